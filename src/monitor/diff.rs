use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::backend::PrinterInfo;

use super::models::{PrinterEvent, PrinterEventKind, PrinterStateSnapshot};

/// Consecutive polls a printer may be missing before it counts as disconnected.
pub const DISCONNECT_AFTER_MISSED_POLLS: u32 = 2;

#[derive(Debug, Clone)]
pub(crate) struct TrackedPrinter {
    pub snapshot: PrinterStateSnapshot,
    pub missed_polls: u32,
}

fn snapshot_of(printer: &PrinterInfo, now: DateTime<Utc>) -> PrinterStateSnapshot {
    PrinterStateSnapshot {
        printer_name: printer.name.clone(),
        state: printer.state,
        state_reasons: printer.state_reasons.clone(),
        taken_at: now,
    }
}

/// Replaces the tracked set with a fresh enumeration without producing events.
pub(crate) fn baseline(printers: &[PrinterInfo], now: DateTime<Utc>) -> HashMap<String, TrackedPrinter> {
    printers
        .iter()
        .map(|printer| (printer.name.clone(), TrackedPrinter { snapshot: snapshot_of(printer, now), missed_polls: 0 }))
        .collect()
}

/// Folds one enumeration into `tracked` and returns the resulting events.
///
/// Reasons are compared as ordered lists. A printer missing from one poll is kept
/// for a grace cycle; only when it is missing again is `disconnected` emitted and
/// its snapshot dropped.
pub(crate) fn apply_poll(tracked: &mut HashMap<String, TrackedPrinter>, printers: &[PrinterInfo], now: DateTime<Utc>) -> Vec<PrinterEvent> {
    let mut events = Vec::new();
    let event = |printer_name: &str, kind| PrinterEvent { printer_name: printer_name.to_string(), kind, timestamp: now };

    for printer in printers {
        match tracked.get_mut(&printer.name) {
            None => {
                events.push(event(&printer.name, PrinterEventKind::Connected));
                tracked.insert(printer.name.clone(), TrackedPrinter { snapshot: snapshot_of(printer, now), missed_polls: 0 });
            }
            Some(previous) => {
                if previous.snapshot.state != printer.state {
                    events.push(event(&printer.name, PrinterEventKind::StateChanged {
                        old_state: previous.snapshot.state,
                        new_state: printer.state,
                    }));
                }
                if previous.snapshot.state_reasons != printer.state_reasons {
                    events.push(event(&printer.name, PrinterEventKind::StateReasonsChanged {
                        old_reasons: previous.snapshot.state_reasons.clone(),
                        new_reasons: printer.state_reasons.clone(),
                    }));
                }
                previous.snapshot = snapshot_of(printer, now);
                previous.missed_polls = 0;
            }
        }
    }

    let seen: BTreeSet<&str> = printers.iter().map(|printer| printer.name.as_str()).collect();
    let mut missing: Vec<String> = tracked.keys().filter(|name| !seen.contains(name.as_str())).cloned().collect();
    missing.sort();
    for name in missing {
        let Some(entry) = tracked.get_mut(&name) else { continue };
        entry.missed_polls += 1;
        if entry.missed_polls >= DISCONNECT_AFTER_MISSED_POLLS {
            tracked.remove(&name);
            events.push(event(&name, PrinterEventKind::Disconnected));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::PrinterState, simulation::engine::SimulationEngine};

    fn printer(name: &str, state: PrinterState, reasons: &[&str]) -> PrinterInfo {
        PrinterInfo {
            name: name.to_string(),
            state,
            state_reasons: reasons.iter().map(|reason| reason.to_string()).collect(),
            ..SimulationEngine::printer()
        }
    }

    fn kinds(events: &[PrinterEvent]) -> Vec<(&str, &PrinterEventKind)> {
        events.iter().map(|event| (event.printer_name.as_str(), &event.kind)).collect()
    }

    #[test]
    fn baseline_is_silent_and_unchanged_polls_are_too() {
        let printers = vec![printer("A", PrinterState::Idle, &[]), printer("B", PrinterState::Idle, &[])];
        let mut tracked = baseline(&printers, Utc::now());
        assert!(apply_poll(&mut tracked, &printers, Utc::now()).is_empty());
        assert!(apply_poll(&mut tracked, &printers, Utc::now()).is_empty());
        assert_eq!(tracked.len(), 2);
    }

    #[test]
    fn new_printers_connect() {
        let mut tracked = baseline(&[printer("A", PrinterState::Idle, &[])], Utc::now());
        let events = apply_poll(&mut tracked, &[printer("A", PrinterState::Idle, &[]), printer("B", PrinterState::Idle, &[])], Utc::now());
        assert_eq!(kinds(&events), vec![("B", &PrinterEventKind::Connected)]);
    }

    #[test]
    fn disconnect_waits_one_grace_cycle() {
        let both = vec![printer("A", PrinterState::Idle, &[]), printer("B", PrinterState::Idle, &[])];
        let only_a = vec![printer("A", PrinterState::Idle, &[])];
        let mut tracked = baseline(&both, Utc::now());

        assert!(apply_poll(&mut tracked, &only_a, Utc::now()).is_empty());
        assert!(tracked.contains_key("B"));

        let events = apply_poll(&mut tracked, &only_a, Utc::now());
        assert_eq!(kinds(&events), vec![("B", &PrinterEventKind::Disconnected)]);
        assert!(!tracked.contains_key("B"));
    }

    #[test]
    fn flapping_printers_produce_nothing() {
        let both = vec![printer("A", PrinterState::Idle, &[]), printer("B", PrinterState::Idle, &[])];
        let only_a = vec![printer("A", PrinterState::Idle, &[])];
        let mut tracked = baseline(&both, Utc::now());

        assert!(apply_poll(&mut tracked, &only_a, Utc::now()).is_empty());
        assert!(apply_poll(&mut tracked, &both, Utc::now()).is_empty());
        assert!(apply_poll(&mut tracked, &only_a, Utc::now()).is_empty());
    }

    #[test]
    fn state_changes_carry_old_and_new() {
        let mut tracked = baseline(&[printer("A", PrinterState::Idle, &[])], Utc::now());
        let events = apply_poll(&mut tracked, &[printer("A", PrinterState::Processing, &[])], Utc::now());
        assert_eq!(
            kinds(&events),
            vec![("A", &PrinterEventKind::StateChanged { old_state: PrinterState::Idle, new_state: PrinterState::Processing })]
        );
        assert_eq!(tracked["A"].snapshot.state, PrinterState::Processing);
    }

    #[test]
    fn reasons_are_compared_in_order() {
        let mut tracked = baseline(&[printer("A", PrinterState::Stopped, &["media-empty", "toner-low"])], Utc::now());
        let events = apply_poll(&mut tracked, &[printer("A", PrinterState::Stopped, &["toner-low", "media-empty"])], Utc::now());
        assert_eq!(
            kinds(&events),
            vec![(
                "A",
                &PrinterEventKind::StateReasonsChanged {
                    old_reasons: vec!["media-empty".into(), "toner-low".into()],
                    new_reasons: vec!["toner-low".into(), "media-empty".into()],
                }
            )]
        );
    }

    #[test]
    fn state_and_reason_changes_are_both_reported() {
        let mut tracked = baseline(&[printer("A", PrinterState::Idle, &[])], Utc::now());
        let events = apply_poll(&mut tracked, &[printer("A", PrinterState::Stopped, &["paused"])], Utc::now());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, PrinterEventKind::StateChanged { .. }));
        assert!(matches!(events[1].kind, PrinterEventKind::StateReasonsChanged { .. }));
    }
}
