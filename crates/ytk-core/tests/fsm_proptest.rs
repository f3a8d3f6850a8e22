// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the image lifecycle state machine.

use proptest::prelude::*;
use ytk_core::ImageStatus;

const ALL: &[ImageStatus] = &[
    ImageStatus::Pending,
    ImageStatus::Compressed,
    ImageStatus::Uploading,
    ImageStatus::Uploaded,
    ImageStatus::Processing,
    ImageStatus::Processed,
    ImageStatus::Confirmed,
    ImageStatus::Failed,
    ImageStatus::Skipped,
];

fn any_status() -> impl Strategy<Value = ImageStatus> {
    prop::sample::select(ALL)
}

proptest! {
    /// Terminal states never admit a successor, and no listed successor is
    /// itself the current state (the FSM has no self-loops).
    #[test]
    fn transitions_are_terminal_consistent(status in any_status()) {
        let succ = status.valid_transitions();
        if status.is_terminal() {
            prop_assert!(succ.is_empty());
        }
        prop_assert!(!succ.contains(&status));
    }

    /// Walking any sequence of valid transitions from `pending` can only
    /// ever reach `confirmed` through `processed`.
    #[test]
    fn confirmed_requires_processed(steps in prop::collection::vec(any_status(), 1..12)) {
        let mut current = ImageStatus::Pending;
        let mut previous = None;
        for next in steps {
            if current.can_transition_to(next) {
                previous = Some(current);
                current = next;
            }
        }
        if current == ImageStatus::Confirmed {
            prop_assert_eq!(previous, Some(ImageStatus::Processed));
        }
    }

    /// Every remote-occupying state is reachable only via `uploaded`.
    #[test]
    fn remote_states_follow_upload(steps in prop::collection::vec(any_status(), 1..12)) {
        let mut current = ImageStatus::Pending;
        let mut saw_uploaded = false;
        for next in steps {
            if current.can_transition_to(next) {
                current = next;
                if current == ImageStatus::Uploaded {
                    saw_uploaded = true;
                }
            }
        }
        if current.occupies_remote() {
            prop_assert!(saw_uploaded);
        }
    }
}
