//! Current-vs-previous state stream derived from one source.
//!
//! The merger is the stateful heart of the pipeline: it windows the fast
//! status feed against the configured interval, overlays the last known
//! variables sample, and emits one [`State`] per accepted tick.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::sample::Sample;
use crate::source::{Source, SourceError, VAR_PREFIX};

/// One emitted tick: the current status sample (with the variables
/// overlay merged in) paired with the previous raw one.
#[derive(Debug, Clone)]
pub struct State {
    /// Status sample for this tick, plus `V_`-prefixed variables keys.
    pub cur: Sample,
    /// The preceding raw status sample (no overlay); `None` on the first
    /// tick of a run and on error ticks.
    pub prev: Option<Sample>,
    /// `cur.uptime - prev.uptime`, in seconds; 0.0 without a prev.
    pub seconds_diff: f64,
    /// Uptime seen on the first readable status sample of the run;
    /// sticky once set, 0 until then.
    pub first_uptime: i64,
}

impl State {
    /// True when the tick's acquisition failed and `cur` carries the
    /// error instead of counters.
    pub fn has_error(&self) -> bool {
        self.cur.has_error()
    }

    pub fn error(&self) -> Option<&str> {
        self.cur.error()
    }
}

/// Starts both feeds of `source` and returns the merged state stream.
///
/// The variables feed is started first; a source that simply has none
/// (`Ok(None)`) is fine and means no overlay, ever. Any startup error on
/// either feed aborts before a single state is produced. The stream ends
/// when the status feed closes, which is a normal termination.
pub fn state_stream(source: &mut dyn Source) -> Result<Receiver<State>, SourceError> {
    let vars_rx = source.variables()?;
    if vars_rx.is_none() {
        debug!("no variables feed, states will carry no overlay");
    }
    let status_rx = source.status()?;
    let interval = source.interval();

    let (tx, rx) = mpsc::sync_channel(0);
    thread::spawn(move || merge_loop(status_rx, vars_rx, interval, tx));
    Ok(rx)
}

/// Consumes status samples in arrival order and emits states.
///
/// Windowing rule: a tick whose uptime advanced by less than the interval
/// is dropped, and the prev reference still advances to the just-read
/// sample, never back to the last accepted one. Downstream rate math
/// depends on that exact advance rule.
fn merge_loop(
    status_rx: Receiver<Sample>,
    vars_rx: Option<Receiver<Sample>>,
    interval: Duration,
    tx: SyncSender<State>,
) {
    let mut prev: Option<Sample> = None;
    let mut first_uptime: i64 = 0;
    let mut overlay = Sample::new();

    for cur in status_rx {
        // First readable, nonzero uptime of the run; never overwritten.
        if first_uptime == 0 {
            first_uptime = cur.get_i("uptime");
        }

        let mut emitted_prev = None;
        let mut seconds_diff = 0.0;

        if !cur.has_error() {
            if let Some(p) = &prev {
                seconds_diff = cur.get_f("uptime") - p.get_f("uptime");
                if seconds_diff < interval.as_secs_f64() {
                    // Dropped tick: no state, but prev still advances.
                    prev = Some(cur);
                    continue;
                }
                emitted_prev = prev.clone();
            }
        }
        // An error tick skips the window entirely (it has no uptime to
        // judge by) and is emitted with no prev; the bookkeeping below
        // keeps pointing at the last real sample.

        // At most one pending variables sample per tick; when none is
        // ready, or the feed is gone, the last overlay stays in force.
        if let Some(rx) = &vars_rx {
            if let Ok(fresh) = rx.try_recv() {
                overlay = fresh;
            }
        }

        let raw = cur.clone();
        let mut cur = cur;
        for (key, value) in overlay.iter() {
            cur.set(format!("{}{}", VAR_PREFIX, key), value);
        }

        let state = State {
            cur,
            prev: emitted_prev,
            seconds_diff,
            first_uptime,
        };
        let advance = !state.has_error();
        if tx.send(state).is_err() {
            return; // consumer gone
        }
        if advance {
            prev = Some(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(uptime: i64) -> Sample {
        let mut s = Sample::new();
        s.set("uptime", uptime.to_string());
        s.set("questions", (uptime * 10).to_string());
        s
    }

    fn vars(version: &str) -> Sample {
        let mut s = Sample::new();
        s.set("version", version);
        s
    }

    /// Runs the merge loop to completion over preloaded feeds.
    fn run_merge(
        statuses: Vec<Sample>,
        variables: Option<Vec<Sample>>,
        interval_secs: u64,
    ) -> Vec<State> {
        let cap = statuses.len() + 1;
        let (stx, srx) = mpsc::sync_channel(cap);
        for s in statuses {
            stx.send(s).unwrap();
        }
        drop(stx);

        let vrx = variables.map(|vs| {
            let (vtx, vrx) = mpsc::sync_channel(vs.len() + 1);
            for v in vs {
                vtx.send(v).unwrap();
            }
            vrx
        });

        let (otx, orx) = mpsc::sync_channel(cap);
        merge_loop(srx, vrx, Duration::from_secs(interval_secs), otx);
        orx.into_iter().collect()
    }

    #[test]
    fn first_tick_emits_without_prev() {
        let states = run_merge(vec![status(100)], None, 5);
        assert_eq!(states.len(), 1);
        assert!(states[0].prev.is_none());
        assert_eq!(states[0].seconds_diff, 0.0);
        assert_eq!(states[0].first_uptime, 100);
        assert_eq!(states[0].cur.get_i("uptime"), 100);
    }

    #[test]
    fn sub_interval_tick_is_dropped() {
        // Uptimes 100, 100, 105 at a 5s interval: the middle tick never
        // shows up, the third diffs against the second.
        let states = run_merge(vec![status(100), status(100), status(105)], None, 5);
        assert_eq!(states.len(), 2);

        assert_eq!(states[0].cur.get_i("uptime"), 100);
        assert!(states[0].prev.is_none());
        assert_eq!(states[0].seconds_diff, 0.0);

        assert_eq!(states[1].cur.get_i("uptime"), 105);
        assert_eq!(states[1].prev.as_ref().unwrap().get_i("uptime"), 100);
        assert_eq!(states[1].seconds_diff, 5.0);
    }

    #[test]
    fn dropped_tick_advances_prev() {
        // 100 emits; 102 is dropped but becomes the new prev, so 106
        // diffs as 4s and is dropped too. Comparing against the last
        // accepted sample would wrongly emit it with a 6s diff.
        let states = run_merge(vec![status(100), status(102), status(106)], None, 5);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].cur.get_i("uptime"), 100);
    }

    #[test]
    fn emitted_states_respect_the_interval_window() {
        let ticks = [100, 101, 103, 108, 109, 115, 116, 122].map(status).to_vec();
        let states = run_merge(ticks, None, 5);
        for state in &states {
            if state.prev.is_some() {
                assert!(state.seconds_diff >= 5.0, "diff {}", state.seconds_diff);
            }
        }
    }

    #[test]
    fn first_uptime_is_sticky() {
        let states = run_merge(vec![status(100), status(105), status(110)], None, 5);
        assert_eq!(states.len(), 3);
        for state in &states {
            assert_eq!(state.first_uptime, 100);
        }
    }

    #[test]
    fn first_uptime_waits_for_a_readable_sample() {
        let mut no_uptime = Sample::new();
        no_uptime.set("questions", "1");
        let states = run_merge(vec![no_uptime, status(100)], None, 5);
        assert_eq!(states[0].first_uptime, 0);
        assert_eq!(states[1].first_uptime, 100);
    }

    #[test]
    fn overlay_is_merged_under_var_prefix() {
        let states = run_merge(vec![status(100)], Some(vec![vars("8.0.36")]), 5);
        assert_eq!(states[0].cur.get_str("V_version"), "8.0.36");
        // The raw status keys are still there.
        assert_eq!(states[0].cur.get_i("uptime"), 100);
    }

    #[test]
    fn last_overlay_sticks_after_the_variables_feed_stops() {
        let states = run_merge(
            vec![status(100), status(105), status(110)],
            Some(vec![vars("8.0.36")]),
            5,
        );
        assert_eq!(states.len(), 3);
        for state in &states {
            assert_eq!(state.cur.get_str("V_version"), "8.0.36");
        }
    }

    #[test]
    fn pending_overlays_are_taken_one_per_tick() {
        let states = run_merge(
            vec![status(100), status(105)],
            Some(vec![vars("8.0.36"), vars("8.0.37")]),
            5,
        );
        assert_eq!(states[0].cur.get_str("V_version"), "8.0.36");
        assert_eq!(states[1].cur.get_str("V_version"), "8.0.37");
    }

    #[test]
    fn no_variables_feed_means_no_overlay_ever() {
        let states = run_merge(vec![status(100)], None, 5);
        assert!(!states[0].cur.has("V_version"));
    }

    #[test]
    fn prev_stays_raw_without_overlay_keys() {
        let states = run_merge(
            vec![status(100), status(105)],
            Some(vec![vars("8.0.36")]),
            5,
        );
        let prev = states[1].prev.as_ref().unwrap();
        assert!(!prev.has("V_version"));
        assert_eq!(prev.get_i("uptime"), 100);
    }

    #[test]
    fn error_tick_is_emitted_and_leaves_bookkeeping_intact() {
        let states = run_merge(
            vec![status(100), Sample::from_error("boom"), status(105)],
            None,
            5,
        );
        assert_eq!(states.len(), 3);

        assert!(states[1].has_error());
        assert_eq!(states[1].error(), Some("boom"));
        assert!(states[1].prev.is_none());
        assert_eq!(states[1].seconds_diff, 0.0);
        assert_eq!(states[1].first_uptime, 100);

        // The error tick did not disturb prev: the next good tick still
        // diffs against uptime 100.
        assert_eq!(states[2].prev.as_ref().unwrap().get_i("uptime"), 100);
        assert_eq!(states[2].seconds_diff, 5.0);
    }

    #[test]
    fn error_tick_still_gets_the_overlay() {
        let states = run_merge(
            vec![status(100), Sample::from_error("boom")],
            Some(vec![vars("8.0.36")]),
            5,
        );
        assert_eq!(states[1].cur.get_str("V_version"), "8.0.36");
    }

    #[test]
    fn stream_closes_when_the_status_feed_closes() {
        let states = run_merge(Vec::new(), None, 5);
        assert!(states.is_empty());
    }

    mod replay {
        use super::*;
        use crate::source::FileSource;
        use std::io::Write;

        fn capture(uptimes: &[i64]) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            for up in uptimes {
                writeln!(file, "Uptime\t{}", up).unwrap();
                writeln!(file, "Questions\t{}", up * 10).unwrap();
                writeln!(file, "MYQTOOLSEND").unwrap();
            }
            file.flush().unwrap();
            file
        }

        fn replay(file: &tempfile::NamedTempFile) -> Vec<State> {
            let mut source = FileSource::new(Duration::from_secs(5), file.path(), None);
            state_stream(&mut source).unwrap().into_iter().collect()
        }

        #[test]
        fn replaying_a_capture_twice_is_deterministic() {
            let file = capture(&[100, 102, 105, 111, 112, 120]);
            let first = replay(&file);
            let second = replay(&file);

            assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(&second) {
                assert_eq!(a.cur.get_i("uptime"), b.cur.get_i("uptime"));
                assert_eq!(a.cur.get_i("questions"), b.cur.get_i("questions"));
                assert_eq!(a.seconds_diff, b.seconds_diff);
                assert_eq!(a.first_uptime, b.first_uptime);
                assert_eq!(
                    a.prev.as_ref().map(|p| p.get_i("uptime")),
                    b.prev.as_ref().map(|p| p.get_i("uptime"))
                );
            }
        }

        #[test]
        fn replay_windows_by_uptime_not_wall_clock() {
            let file = capture(&[100, 102, 105]);
            let states = replay(&file);
            // 102 dropped (diff 2) and made prev; 105 dropped too (diff 3).
            assert_eq!(states.len(), 1);
            assert_eq!(states[0].cur.get_i("uptime"), 100);
        }
    }
}
