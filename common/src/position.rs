use thiserror::Error;

use crate::{
    config::RemoteConfig,
    remote::{RemoteAction, RemoteButton},
    types::WindowId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("window {index} has no selector slot (selectable 0..{selectable})")]
pub struct NotSelectable {
    pub index: usize,
    pub selectable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectDirection {
    Increase,
    Decrease,
}

impl SelectDirection {
    pub fn button(self) -> RemoteButton {
        match self {
            Self::Increase => RemoteButton::SelectNext,
            Self::Decrease => RemoteButton::SelectPrevious,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPlan {
    pub target: usize,
    pub direction: SelectDirection,
    pub steps: usize,
}

impl SelectionPlan {
    pub fn is_noop(&self) -> bool {
        self.steps == 0
    }

    /// `steps` clicks, each followed by the inter-click settle delay.
    pub fn actions(&self, config: &RemoteConfig) -> Vec<RemoteAction> {
        let button = self.direction.button();
        let mut actions = Vec::with_capacity(self.steps * 4);
        for _ in 0..self.steps {
            actions.push(RemoteAction::Press(button));
            actions.push(RemoteAction::Delay(config.click_ms));
            actions.push(RemoteAction::Release(button));
            actions.push(RemoteAction::Delay(config.select_settle_ms));
        }
        actions
    }
}

/// Believed selector position of the remote.
///
/// Nothing reports the real selection back, so the cursor is only ever the
/// result of counting the clicks we issued. A missed click leaves it out of
/// step with the remote until the next reset.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    cursor: usize,
    selectable: usize,
}

impl PositionTracker {
    /// Starts at slot 0, where the remote lands after a reset.
    pub fn new(window_count: usize) -> Self {
        Self {
            cursor: 0,
            selectable: window_count.saturating_sub(1),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn plan(&self, target: WindowId) -> Result<SelectionPlan, NotSelectable> {
        let target = target.index();
        if target >= self.selectable {
            return Err(NotSelectable {
                index: target,
                selectable: self.selectable,
            });
        }

        let delta = target as isize - self.cursor as isize;
        let direction = if delta > 0 {
            SelectDirection::Increase
        } else {
            SelectDirection::Decrease
        };

        Ok(SelectionPlan {
            target,
            direction,
            steps: delta.unsigned_abs(),
        })
    }

    /// Records that every click of `plan` has been issued.
    pub fn complete(&mut self, plan: &SelectionPlan) {
        self.cursor = plan.target;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn id(index: usize) -> WindowId {
        WindowId::new(index, 5).unwrap()
    }

    #[test]
    fn steps_match_distance_for_every_pair() {
        for cursor in 0..4 {
            for target in 0..4 {
                let mut tracker = PositionTracker::new(5);
                tracker.cursor = cursor;
                let plan = tracker.plan(id(target)).unwrap();

                assert_eq!(plan.steps, target.abs_diff(cursor));
                if target > cursor {
                    assert_eq!(plan.direction, SelectDirection::Increase);
                } else if target < cursor {
                    assert_eq!(plan.direction, SelectDirection::Decrease);
                }
            }
        }
    }

    #[test]
    fn same_target_is_noop() {
        let mut tracker = PositionTracker::new(5);
        tracker.cursor = 2;
        let plan = tracker.plan(id(2)).unwrap();

        assert!(plan.is_noop());
        assert!(plan.actions(&RemoteConfig::default()).is_empty());
        tracker.complete(&plan);
        assert_eq!(tracker.cursor(), 2);
    }

    #[test]
    fn cursor_moves_only_on_complete() {
        let mut tracker = PositionTracker::new(5);
        let plan = tracker.plan(id(3)).unwrap();
        assert_eq!(tracker.cursor(), 0);

        tracker.complete(&plan);
        assert_eq!(tracker.cursor(), 3);
    }

    #[test]
    fn alias_has_no_selector_slot() {
        let tracker = PositionTracker::new(5);
        assert_eq!(
            tracker.plan(WindowId::alias(5)),
            Err(NotSelectable {
                index: 4,
                selectable: 4
            })
        );
    }

    #[test]
    fn click_sequence_settles_after_each_click() {
        let mut tracker = PositionTracker::new(5);
        tracker.cursor = 3;
        let config = RemoteConfig::default();
        let actions = tracker.plan(id(1)).unwrap().actions(&config);

        let click = vec![
            RemoteAction::Press(RemoteButton::SelectPrevious),
            RemoteAction::Delay(300),
            RemoteAction::Release(RemoteButton::SelectPrevious),
            RemoteAction::Delay(600),
        ];
        assert_eq!(actions, [click.clone(), click].concat());
    }
}
