//! Rule-based alert evaluation over live vehicle samples.
//!
//! A [`MonitorAlerts`] is a named evaluator (e.g. `warning`, `alert`) holding
//! a rule table keyed by listen-key and a condition table of currently firing
//! keys. Samples run through [`MonitorAlerts::check`], which emits an
//! [`AlertRecord`] only on edge transitions: entering the firing state, or
//! leaving it when the rule does not hold/latch.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, with_timeout};
use std::collections::HashMap;
use thiserror::Error;

use crate::records::{AlertRecord, Comparator};
use crate::{AlertQueueSender, RunState, SampleQueueReceiver};

/// Task pool size for monitor loops; one per named monitor.
pub const MAX_MONITORS: usize = 4;

/// Poll interval for the monitor loop's running-flag check.
const RECEIVE_POLL: Duration = Duration::from_millis(500);

/// Errors surfaced by rule configuration.
#[derive(Debug, Error, PartialEq)]
pub enum AlertConfigError {
    /// `REMOVE` is a deletion sentinel, not an installable comparator.
    #[error("REMOVE is not an installable comparator")]
    RemoveComparator,
    /// The identical rule shape is already installed for this listen-key.
    #[error("identical rule already installed for {0}")]
    DuplicateRule(String),
}

/// One threshold rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub comparator: Comparator,
    /// When set, a fired condition stays latched until explicitly cleared.
    pub hold: bool,
    pub threshold: f64,
}

/// A named monitor: rule table, condition table and the alert output channel.
pub struct MonitorAlerts {
    name: String,
    rules: HashMap<String, Rule>,
    conditions: HashMap<String, bool>,
    out: AlertQueueSender,
}

impl MonitorAlerts {
    pub fn new(name: &str, out: AlertQueueSender) -> Self {
        Self {
            name: name.to_string(),
            rules: HashMap::new(),
            conditions: HashMap::new(),
            out,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installed rules, for config-request answers.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.rules.iter().map(|(k, r)| (k.as_str(), r))
    }

    /// Install or replace the rule for `listen_to`.
    ///
    /// `REMOVE` must go through [`remove_rule`]; re-installing the identical
    /// shape is reported so a config loop can detect redundant updates.
    ///
    /// [`remove_rule`]: MonitorAlerts::remove_rule
    pub fn add_rule(
        &mut self,
        listen_to: &str,
        comparator: Comparator,
        threshold: f64,
        hold: bool,
    ) -> Result<(), AlertConfigError> {
        if comparator == Comparator::Remove {
            return Err(AlertConfigError::RemoveComparator);
        }
        let rule = Rule {
            comparator,
            hold,
            threshold,
        };
        if self.rules.get(listen_to) == Some(&rule) {
            return Err(AlertConfigError::DuplicateRule(listen_to.to_string()));
        }
        self.rules.insert(listen_to.to_string(), rule);
        Ok(())
    }

    /// Remove the rule for `listen_to`. A latched condition stays in the
    /// condition table until explicitly cleared; a rule added back later
    /// inherits it.
    pub fn remove_rule(&mut self, listen_to: &str) -> bool {
        self.rules.remove(listen_to).is_some()
    }

    /// Whether `listen_to` is currently firing.
    pub fn firing(&self, listen_to: &str) -> bool {
        self.conditions.get(listen_to).copied().unwrap_or(false)
    }

    /// Force-clear a condition and emit a clear event with value 0.
    pub async fn clear_condition(&mut self, listen_to: &str) {
        self.conditions.insert(listen_to.to_string(), false);
        self.send_update(listen_to, 0.0).await;
    }

    /// Drop all latched state silently (used on reconfiguration).
    pub fn clear_all_conditions(&mut self) {
        self.conditions.clear();
    }

    async fn send_update(&self, listen_to: &str, value: f64) {
        self.out
            .send(AlertRecord::new(
                &self.name,
                listen_to,
                self.firing(listen_to),
                value,
            ))
            .await;
    }

    /// Evaluate one sample against the rule table.
    ///
    /// Emission happens only on edges: entering the firing state, or leaving
    /// it for a non-holding rule. A holding rule stays latched until an
    /// explicit clear. Keys without a rule are ignored.
    pub async fn check(&mut self, listen_to: &str, value: f64) {
        let Some(rule) = self.rules.get(listen_to) else {
            return;
        };

        let alert = rule.comparator.compare(value, rule.threshold);
        let hold = rule.hold;

        if self.firing(listen_to) {
            if alert || hold {
                return;
            }
            self.conditions.insert(listen_to.to_string(), false);
            self.send_update(listen_to, value).await;
        } else if alert {
            self.conditions.insert(listen_to.to_string(), true);
            self.send_update(listen_to, value).await;
        }
    }
}

/// Monitor driver loop: feeds the sample channel into [`MonitorAlerts::check`]
/// until the run flag clears.
#[embassy_executor::task(pool_size = MAX_MONITORS)]
pub async fn monitor_task(
    monitor: &'static Mutex<CriticalSectionRawMutex, MonitorAlerts>,
    samples: SampleQueueReceiver,
    run: &'static RunState,
) {
    run.task_started();
    {
        let monitor = monitor.lock().await;
        log::info!("alert monitor '{}' started", monitor.name());
    }
    while run.is_running() {
        match with_timeout(RECEIVE_POLL, samples.receive()).await {
            Ok(sample) => {
                monitor
                    .lock()
                    .await
                    .check(&sample.key, sample.value)
                    .await;
            }
            Err(_) => continue,
        }
    }
    log::info!("alert monitor loop ended");
    run.task_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertQueue;
    use futures::executor::block_on;

    fn monitor() -> (MonitorAlerts, &'static AlertQueue) {
        let queue: &'static AlertQueue = Box::leak(Box::new(AlertQueue::new()));
        (MonitorAlerts::new("engine", queue.sender()), queue)
    }

    #[test]
    fn add_and_remove_rule() {
        let (mut mon, _) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, true).unwrap();
        assert_eq!(mon.rules().count(), 1);
        assert!(mon.remove_rule("rpm"));
        assert!(!mon.remove_rule("rpm"));
        assert_eq!(mon.rules().count(), 0);
    }

    #[test]
    fn add_rule_rejects_remove_sentinel() {
        let (mut mon, _) = monitor();
        assert_eq!(
            mon.add_rule("rpm", Comparator::Remove, 0.0, false),
            Err(AlertConfigError::RemoveComparator)
        );
    }

    #[test]
    fn add_rule_reports_identical_shape() {
        let (mut mon, _) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, true).unwrap();
        assert_eq!(
            mon.add_rule("rpm", Comparator::Gt, 3000.0, true),
            Err(AlertConfigError::DuplicateRule("rpm".to_string()))
        );
        // a changed threshold is a replacement, not a duplicate
        mon.add_rule("rpm", Comparator::Gt, 3500.0, true).unwrap();
    }

    #[test]
    fn gt_condition_triggers_once() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, true).unwrap();
        block_on(mon.check("rpm", 3500.0));

        let alert = queue.try_receive().unwrap();
        assert_eq!(alert.listen_to, "rpm");
        assert!(alert.triggered);
        assert_eq!(alert.value, 3500.0);

        // still firing: no second emission
        block_on(mon.check("rpm", 3600.0));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn unmatched_rule_stays_silent() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Lt, 1000.0, true).unwrap();
        block_on(mon.check("rpm", 1500.0));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn unknown_key_is_ignored() {
        let (mut mon, queue) = monitor();
        block_on(mon.check("rpm", 9000.0));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn non_holding_rule_clears_on_falling_edge() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, false).unwrap();

        block_on(mon.check("rpm", 3500.0));
        assert!(queue.try_receive().unwrap().triggered);

        block_on(mon.check("rpm", 2500.0));
        let clear = queue.try_receive().unwrap();
        assert!(!clear.triggered);
        assert_eq!(clear.value, 2500.0);
    }

    #[test]
    fn holding_rule_latches_until_cleared() {
        // rule (GTE, 4500, hold); samples 4000, 4600, 5000, 3000, 3000
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gte, 4500.0, true).unwrap();

        block_on(async {
            mon.check("rpm", 4000.0).await;
            mon.check("rpm", 4600.0).await;
            mon.check("rpm", 5000.0).await;
            mon.check("rpm", 3000.0).await;
            mon.check("rpm", 3000.0).await;
        });

        let alert = queue.try_receive().unwrap();
        assert!(alert.triggered);
        assert_eq!(alert.value, 4600.0);
        assert!(queue.try_receive().is_err());
        assert!(mon.firing("rpm"));

        block_on(mon.clear_condition("rpm"));
        let clear = queue.try_receive().unwrap();
        assert!(!clear.triggered);
        assert_eq!(clear.value, 0.0);
        assert!(!mon.firing("rpm"));
    }

    #[test]
    fn edge_sequence_around_threshold() {
        // (GT, T, hold=false) over T-1, T+1, T+2, T-1, T+1:
        // emissions are false->true, absent, ->false, ->true
        let t = 100.0;
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, t, false).unwrap();

        block_on(async {
            mon.check("rpm", t - 1.0).await;
            mon.check("rpm", t + 1.0).await;
            mon.check("rpm", t + 2.0).await;
            mon.check("rpm", t - 1.0).await;
            mon.check("rpm", t + 1.0).await;
        });

        let emitted: Vec<bool> = std::iter::from_fn(|| queue.try_receive().ok())
            .map(|a| a.triggered)
            .collect();
        assert_eq!(emitted, vec![true, false, true]);
    }

    #[test]
    fn remove_rule_keeps_latched_condition() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, false).unwrap();
        block_on(mon.check("rpm", 3500.0));
        queue.try_receive().unwrap();

        mon.remove_rule("rpm");
        assert!(mon.firing("rpm"));

        // a re-added rule inherits the latched state: the next in-range
        // sample emits the falling edge
        mon.add_rule("rpm", Comparator::Gt, 3000.0, false).unwrap();
        block_on(mon.check("rpm", 1000.0));
        assert!(!queue.try_receive().unwrap().triggered);
    }

    #[test]
    fn clear_all_conditions_is_silent() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, true).unwrap();
        block_on(mon.check("rpm", 3500.0));
        queue.try_receive().unwrap();

        mon.clear_all_conditions();
        assert!(queue.try_receive().is_err());

        // alert fires again after the reset
        block_on(mon.check("rpm", 3500.0));
        assert!(queue.try_receive().unwrap().triggered);
    }

    #[test]
    fn multiple_rules_fire_independently() {
        let (mut mon, queue) = monitor();
        mon.add_rule("rpm", Comparator::Gt, 3000.0, true).unwrap();
        mon.add_rule("temp", Comparator::Gte, 90.0, true).unwrap();

        block_on(async {
            mon.check("rpm", 3500.0).await;
            mon.check("temp", 95.0).await;
        });

        let mut seen: Vec<(String, f64)> = std::iter::from_fn(|| queue.try_receive().ok())
            .map(|a| (a.listen_to, a.value))
            .collect();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![("rpm".to_string(), 3500.0), ("temp".to_string(), 95.0)]
        );
    }
}
