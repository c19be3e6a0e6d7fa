//! The sequencer clock.
//!
//! A dedicated thread owns a `crossbeam_channel::tick` ticker firing at the
//! MIDI beat-clock rate (24 pulses per quarter note) and invokes the tick
//! callback on every firing. Tempo changes arrive over a channel and are
//! applied only after the next firing, so the interval currently in flight
//! is never shortened or stretched.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use ostinato_types::{MAX_TEMPO, MIN_TEMPO, PULSES_PER_QUARTER_NOTE};

const UPDATE_BUFFER_SIZE: usize = 128;

/// Tick interval for a tempo, in microseconds of wall time.
pub fn interval(tempo: f64) -> Duration {
    Duration::from_micros((60_000_000.0 / (tempo * PULSES_PER_QUARTER_NOTE as f64)) as u64)
}

/// Shared tempo handle. Cloned into whoever needs to read or request a
/// tempo change; the clock thread is the only place a change takes effect.
#[derive(Clone)]
pub struct TempoCtl {
    update_tx: Sender<f64>,
    tempo: Arc<Mutex<f64>>,
}

impl TempoCtl {
    pub(crate) fn new(tempo: f64) -> (Self, Receiver<f64>) {
        let (update_tx, update_rx) = bounded(UPDATE_BUFFER_SIZE);
        (
            Self {
                update_tx,
                tempo: Arc::new(Mutex::new(tempo)),
            },
            update_rx,
        )
    }

    /// Request a tempo change. Out-of-range values are ignored. The new
    /// interval takes effect at the next tick boundary.
    pub fn set(&self, tempo: f64) {
        if !(MIN_TEMPO..=MAX_TEMPO).contains(&tempo) {
            return;
        }
        if let Ok(mut current) = self.tempo.lock() {
            *current = tempo;
        }
        let _ = self.update_tx.try_send(tempo);
    }

    pub fn get(&self) -> f64 {
        self.tempo.lock().map(|t| *t).unwrap_or(MIN_TEMPO)
    }
}

pub struct Clock {
    ctl: TempoCtl,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Clock {
    /// Start the clock thread. `on_tick` runs on that thread once per
    /// pulse; it must hand off any heavy work, the clock has no
    /// backpressure of its own.
    pub fn start<F>(ctl: TempoCtl, update_rx: Receiver<f64>, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(1);
        let tempo = ctl.get();
        let worker = thread::spawn(move || {
            let mut ticker = crossbeam_channel::tick(interval(tempo));
            let mut pending: Option<f64> = None;
            let mut fired = false;
            loop {
                select! {
                    recv(ticker) -> _ => {
                        on_tick();
                        fired = true;
                    }
                    recv(update_rx) -> msg => match msg {
                        Ok(tempo) => pending = Some(tempo),
                        Err(_) => return,
                    },
                    recv(stop_rx) -> _ => return,
                }
                // A pending tempo replaces the ticker only after a
                // firing, keeping the running interval intact.
                if fired {
                    fired = false;
                    if let Some(tempo) = pending.take() {
                        ticker = crossbeam_channel::tick(interval(tempo));
                    }
                }
            }
        });
        Self {
            ctl,
            stop_tx,
            worker: Some(worker),
        }
    }

    pub fn ctl(&self) -> TempoCtl {
        self.ctl.clone()
    }

    pub fn set_tempo(&self, tempo: f64) {
        self.ctl.set(tempo);
    }

    pub fn tempo(&self) -> f64 {
        self.ctl.get()
    }

    /// Stop the clock thread and wait for it to exit.
    pub fn close(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_interval_follows_midi_clock_rate() {
        // 120 BPM -> 24 pulses per 0.5s quarter note -> 20833us.
        assert_eq!(interval(120.0), Duration::from_micros(20_833));
        assert_eq!(interval(60.0), Duration::from_micros(41_666));
    }

    #[test]
    fn test_set_tempo_rejects_out_of_range() {
        let (ctl, _rx) = TempoCtl::new(120.0);
        ctl.set(0.5);
        assert_eq!(ctl.get(), 120.0);
        ctl.set(300.1);
        assert_eq!(ctl.get(), 120.0);
        ctl.set(140.0);
        assert_eq!(ctl.get(), 140.0);
    }

    #[test]
    fn test_tempo_update_waits_for_tick_boundary() {
        let (ctl, rx) = TempoCtl::new(120.0);
        ctl.set(200.0);
        // The reader sees the new tempo right away; the clock thread only
        // picks the update off the channel at its own pace.
        assert_eq!(ctl.get(), 200.0);
        assert_eq!(rx.try_recv(), Ok(200.0));
    }

    #[test]
    fn test_clock_delivers_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let (ctl, update_rx) = TempoCtl::new(300.0);
        let mut clock = Clock::start(ctl, update_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // 300 BPM ticks every ~8.3ms; expect well over 5 in 200ms.
        thread::sleep(Duration::from_millis(200));
        clock.close();
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }
}
