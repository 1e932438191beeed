use proptest::prelude::*;

use super::fixture::Fixture;
use crate::window::{Compositor, Toplevel, WindowId, WindowSnapshot};

#[derive(Debug, Clone)]
enum Op {
    Open { app_id: String, title: String },
    Close(usize),
    FocusViaBus(usize),
    Retitle(usize, String),
}

fn arbitrary_title() -> impl Strategy<Value = String> {
    // No backslashes or control characters: those leave the record unparsable as JSON.
    "[a-zA-Z0-9 .:'\"-]{0,16}"
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => ("[a-z.]{0,8}", arbitrary_title()).prop_map(|(app_id, title)| Op::Open { app_id, title }),
        1 => any::<usize>().prop_map(Op::Close),
        2 => any::<usize>().prop_map(Op::FocusViaBus),
        1 => (any::<usize>(), arbitrary_title()).prop_map(|(idx, title)| Op::Retitle(idx, title)),
    ]
}

fn live_ids(f: &Fixture) -> Vec<WindowId> {
    f.state.compositor.windows().map(|w| w.id()).collect()
}

fn pick(f: &Fixture, idx: usize) -> Option<WindowId> {
    let ids = live_ids(f);
    (!ids.is_empty()).then(|| ids[idx % ids.len()])
}

proptest! {
    /// `GetWindows` always lists exactly the live windows, in enumeration order, with ids that
    /// lead back to them.
    #[test]
    fn get_windows_tracks_live_windows(ops in prop::collection::vec(arbitrary_op(), 0..40)) {
        let mut f = Fixture::new();
        let mut opened = 0;
        let mut closed = 0;

        for op in ops {
            match op {
                Op::Open { app_id, title } => {
                    f.state.compositor.add_window(app_id, title);
                }
                Op::Close(idx) => {
                    if let Some(id) = pick(&f, idx) {
                        f.state.compositor.close_window(id);
                    }
                }
                Op::FocusViaBus(idx) => {
                    if let Some(id) = pick(&f, idx) {
                        prop_assert_eq!(f.focus_window(&id.to_string()), id.to_string());
                        prop_assert_eq!(f.state.compositor.focused(), Some(id));
                    }
                }
                Op::Retitle(idx, title) => {
                    if let Some(id) = pick(&f, idx) {
                        f.state.compositor.set_title(id, title);
                    }
                }
            }

            f.state.refresh();
            for line in f.take_signals().lines() {
                if line.starts_with("WindowOpened ") {
                    opened += 1;
                } else if line.starts_with("WindowClosed ") {
                    closed += 1;
                }
            }

            let listed: Vec<WindowSnapshot> = serde_json::from_str(&f.get_windows()).unwrap();
            let live = live_ids(&f);
            prop_assert_eq!(listed.len(), live.len());
            prop_assert_eq!(opened - closed, live.len());

            for (snapshot, id) in listed.iter().zip(&live) {
                prop_assert_eq!(&snapshot.id, &id.to_string());

                let parsed = WindowId::parse(&snapshot.id);
                prop_assert_eq!(parsed, Some(*id));

                let window = f.state.compositor.find_window(*id).unwrap();
                let title = window.title().unwrap_or_default().replace('"', "'");
                prop_assert_eq!(&snapshot.title, &title);
                prop_assert_eq!(Some(snapshot.app_id.as_str()), window.app_id());
            }
        }
    }
}
