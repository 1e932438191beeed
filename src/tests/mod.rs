
mod window_list;
mod wire;
