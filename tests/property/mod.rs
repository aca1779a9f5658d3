//! Property-based tests for the safety net invariants
//!
//! Random sequences of writes, removals and undos against a small set of
//! files, checked against a model of what the directory should contain.

use ::orcli::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

const NAMES: &[&str] = &["a.txt", "b.bin", "dir/c.txt"];

#[derive(Debug, Clone)]
enum Step {
    Write { file: usize, content: Vec<u8> },
    Remove { file: usize },
    Undo,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..NAMES.len(), prop::collection::vec(any::<u8>(), 0..2048))
            .prop_map(|(file, content)| Step::Write { file, content }),
        1 => (0..NAMES.len()).prop_map(|file| Step::Remove { file }),
        2 => Just(Step::Undo),
    ]
}

fn open(work: &TempDir) -> SafetyNet {
    SafetyNet::open_or_init(
        work.path().to_path_buf(),
        SafetyNet::default_storage_path(work.path()),
    )
    .unwrap()
}

fn snapshot(work: &TempDir) -> BTreeMap<&'static str, Option<Vec<u8>>> {
    NAMES
        .iter()
        .map(|name| (*name, fs::read(work.path().join(name)).ok()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ids_strictly_increase(steps in prop::collection::vec(step_strategy(), 1..25)) {
        let work = TempDir::new().unwrap();
        let net = open(&work);

        for step in &steps {
            let _ = match step {
                Step::Write { file, content } => net.write(NAMES[*file], content).map(|_| ()),
                Step::Remove { file } => net.remove(NAMES[*file]).map(|_| ()),
                Step::Undo => net.undo().map(|_| ()),
            };
        }

        let ids: Vec<u64> = net.history().unwrap().iter().map(|r| r.id).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_undo_restores_state_before_last_change(
        steps in prop::collection::vec(step_strategy(), 1..20)
    ) {
        let work = TempDir::new().unwrap();
        let net = open(&work);

        let mut before_last_change = snapshot(&work);
        let mut last_changed = false;
        for step in &steps {
            let before = snapshot(&work);
            let changed = match step {
                Step::Write { file, content } => net.write(NAMES[*file], content).is_ok(),
                Step::Remove { file } => net.remove(NAMES[*file]).is_ok(),
                Step::Undo => matches!(net.undo(), Ok(UndoOutcome::Restored(_))),
            };
            if changed {
                before_last_change = before;
            }
            last_changed = changed;
        }

        if last_changed {
            net.undo().unwrap();
            prop_assert_eq!(snapshot(&work), before_last_change);
        }
    }

    #[test]
    fn prop_binary_content_round_trips(content in prop::collection::vec(any::<u8>(), 0..8192)) {
        let work = TempDir::new().unwrap();
        let net = open(&work);
        let target = work.path().join("blob.bin");
        fs::write(&target, &content).unwrap();

        net.write("blob.bin", b"replaced").unwrap();
        net.undo().unwrap();
        prop_assert_eq!(fs::read(&target).unwrap(), content);
    }
}
