//! MIDI output dispatch.
//!
//! `MidiOut` is the capability the engine consumes: fire-and-forget message
//! emission to a numbered output device. `MidirOut` implements it over
//! midir with one bounded queue and one delivery thread per enumerated
//! port, so a slow device can never stall the clock or the other devices.
//! On shutdown every worker drains its queue before exiting; a sequencer
//! that dies mid-pattern must not leave stuck notes.

use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Sender};
use midir::{MidiOutput, MidiOutputConnection};

use super::message::Message;

/// Per-device queue depth. 16 tracks with every step active all pointed at
/// one device at high tempo produce a lot of messages; once the queue is
/// full, enqueueing blocks until the device catches up.
const MIDI_BUFFER_SIZE: usize = 1024;

/// Abstract MIDI output consumed by the sequencer. Implementations must be
/// safe to call from the clock thread and every track worker at once.
pub trait MidiOut: Send + Sync {
    /// Names of the available output devices, in index order.
    fn devices(&self) -> Vec<String>;

    fn note_on(&self, device: usize, channel: u8, note: u8, velocity: u8) {
        self.enqueue(
            device,
            Message::NoteOn {
                channel,
                note,
                velocity,
            },
        );
    }

    fn note_off(&self, device: usize, channel: u8, note: u8) {
        self.enqueue(device, Message::NoteOff { channel, note });
    }

    fn control_change(&self, device: usize, channel: u8, controller: u8, value: u8) {
        self.enqueue(
            device,
            Message::ControlChange {
                channel,
                controller,
                value,
            },
        );
    }

    fn program_change(&self, device: usize, channel: u8, program: u8) {
        self.enqueue(device, Message::ProgramChange { channel, program });
    }

    fn pitch_bend(&self, device: usize, channel: u8, value: i16) {
        self.enqueue(device, Message::PitchBend { channel, value });
    }

    fn aftertouch(&self, device: usize, channel: u8, pressure: u8) {
        self.enqueue(device, Message::Aftertouch { channel, pressure });
    }

    /// Send a beat-clock pulse to each of the given devices.
    fn send_clock(&self, devices: &[usize]) {
        for &device in devices {
            self.enqueue(device, Message::TimingClock);
        }
    }

    /// Queue a message to a device. Unknown device indices are ignored.
    fn enqueue(&self, device: usize, message: Message);

    /// Stop all delivery workers, draining queued messages first.
    fn close(&self);
}

/// Something that can put bytes on a wire. midir's connection in
/// production, a recording sink in tests.
pub(crate) trait SendPort: Send + 'static {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String>;
}

impl SendPort for MidiOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        MidiOutputConnection::send(self, bytes).map_err(|e| e.to_string())
    }
}

pub(crate) struct DeviceWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

/// Spawn the delivery thread for one device. The worker blocks only on its
/// own queue; on stop it drains and sends everything still queued (note
/// offs included) before exiting. A failed send is logged and skipped so
/// one bad message cannot halt the device's pipeline.
pub(crate) fn spawn_device_worker(
    name: String,
    mut port: impl SendPort,
) -> (Sender<Message>, DeviceWorker) {
    let (queue_tx, queue_rx) = bounded::<Message>(MIDI_BUFFER_SIZE);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = thread::spawn(move || loop {
        select! {
            recv(queue_rx) -> msg => match msg {
                Ok(message) => {
                    if let Err(e) = port.send(&message.to_bytes()) {
                        log::warn!(target: "midi", "send to {} failed: {}", name, e);
                    }
                }
                Err(_) => return,
            },
            recv(stop_rx) -> _ => {
                while let Ok(message) = queue_rx.try_recv() {
                    if let Err(e) = port.send(&message.to_bytes()) {
                        log::warn!(target: "midi", "send to {} failed: {}", name, e);
                    }
                }
                return;
            }
        }
    });
    (
        queue_tx,
        DeviceWorker {
            stop_tx,
            handle: Some(handle),
        },
    )
}

impl DeviceWorker {
    pub(crate) fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// midir-backed output over every connected port.
pub struct MidirOut {
    names: Vec<String>,
    queues: Vec<Sender<Message>>,
    workers: Mutex<Vec<DeviceWorker>>,
}

impl MidirOut {
    /// Enumerate output ports and start one delivery worker per port.
    /// No ports at all is fatal: the engine cannot run without somewhere
    /// to send notes.
    pub fn new() -> Result<Self, String> {
        let probe = MidiOutput::new("ostinato").map_err(|e| e.to_string())?;
        let port_count = probe.ports().len();
        if port_count == 0 {
            return Err("no MIDI output devices available".to_string());
        }

        let mut names = Vec::with_capacity(port_count);
        let mut queues = Vec::with_capacity(port_count);
        let mut workers = Vec::with_capacity(port_count);
        for index in 0..port_count {
            // Connecting consumes the MidiOutput, so each port gets a
            // fresh handle.
            let midi_out = MidiOutput::new("ostinato").map_err(|e| e.to_string())?;
            let ports = midi_out.ports();
            let port = ports
                .get(index)
                .ok_or_else(|| format!("MIDI port {} disappeared during startup", index))?;
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| format!("device {}", index));
            let connection = midi_out
                .connect(port, "ostinato-out")
                .map_err(|e| format!("failed to open {}: {}", name, e))?;
            let (queue_tx, worker) = spawn_device_worker(name.clone(), connection);
            log::info!(target: "midi", "output {}: {}", index, name);
            names.push(name);
            queues.push(queue_tx);
            workers.push(worker);
        }

        Ok(Self {
            names,
            queues,
            workers: Mutex::new(workers),
        })
    }
}

impl MidiOut for MidirOut {
    fn devices(&self) -> Vec<String> {
        self.names.clone()
    }

    fn enqueue(&self, device: usize, message: Message) {
        if let Some(queue) = self.queues.get(device) {
            // Blocks only when the device queue is full; after close the
            // channel is disconnected and the message is dropped.
            let _ = queue.send(message);
        }
    }

    fn close(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            for worker in workers.iter_mut() {
                worker.stop();
            }
            workers.clear();
        }
    }
}

impl Drop for MidirOut {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Sink that records sent bytes, optionally slowly or flakily.
    struct TestPort {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        delay: Option<Duration>,
        fail_on: Option<usize>,
        count: usize,
    }

    impl TestPort {
        fn new(sent: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
            Self {
                sent,
                delay: None,
                fail_on: None,
                count: 0,
            }
        }
    }

    impl SendPort for TestPort {
        fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.count += 1;
            if self.fail_on == Some(self.count) {
                return Err("device unplugged".to_string());
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(bytes.to_vec());
            }
            Ok(())
        }
    }

    #[test]
    fn test_worker_delivers_messages() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (queue, mut worker) = spawn_device_worker("test".into(), TestPort::new(sent.clone()));
        queue
            .send(Message::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            })
            .unwrap();
        worker.stop();
        assert_eq!(sent.lock().unwrap().as_slice(), &[vec![0x90, 60, 100]]);
    }

    #[test]
    fn test_stop_drains_pending_note_offs() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut port = TestPort::new(sent.clone());
        // Slow device: messages pile up in the queue before stop.
        port.delay = Some(Duration::from_millis(5));
        let (queue, mut worker) = spawn_device_worker("slow".into(), port);
        for note in [60, 62, 64, 65, 67] {
            queue.send(Message::NoteOff { channel: 0, note }).unwrap();
        }
        worker.stop();
        // All five queued note offs must have been sent before exit.
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[4], vec![0x80, 67, 0]);
    }

    #[test]
    fn test_send_failure_does_not_halt_worker() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut port = TestPort::new(sent.clone());
        port.fail_on = Some(2);
        let (queue, mut worker) = spawn_device_worker("flaky".into(), port);
        for note in [60, 62, 64] {
            queue.send(Message::NoteOff { channel: 0, note }).unwrap();
        }
        worker.stop();
        // The second message was lost, the rest went through.
        assert_eq!(sent.lock().unwrap().len(), 2);
    }
}
