//! Owns the set of running [`RemedyWorker`]s, one per registered remedy, and
//! restarts a worker whose task exits unexpectedly (SPEC_FULL.md §1, §2).
//! Runs as its own task with its own mailbox, the same shape as
//! [`crate::handler::Handler`].

use ahash::AHashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::id::AlarmId;
use crate::remedy::{RemedyEvent, RemedySpec, RemedyWorker};

const MAILBOX_CAPACITY: usize = 256;

enum SupervisorMessage {
    Register { id: AlarmId, spec: RemedySpec },
    Unregister { id: AlarmId },
    AlarmSet { id: AlarmId },
    AlarmCleared { id: AlarmId },
    WorkerExited { id: AlarmId, generation: u64 },
    Stop,
}

struct Entry {
    spec: RemedySpec,
    events: mpsc::Sender<RemedyEvent>,
    generation: u64,
}

/// A cheaply-clonable handle used by the Handler to drive remedy workers.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
}

impl SupervisorHandle {
    pub async fn register(&self, id: AlarmId, spec: RemedySpec) {
        let _ = self.sender.send(SupervisorMessage::Register { id, spec }).await;
    }

    pub async fn unregister(&self, id: AlarmId) {
        let _ = self.sender.send(SupervisorMessage::Unregister { id }).await;
    }

    pub async fn notify_set(&self, id: AlarmId) {
        let _ = self.sender.send(SupervisorMessage::AlarmSet { id }).await;
    }

    pub async fn notify_cleared(&self, id: AlarmId) {
        let _ = self.sender.send(SupervisorMessage::AlarmCleared { id }).await;
    }

    pub async fn stop(&self) {
        let _ = self.sender.send(SupervisorMessage::Stop).await;
    }
}

struct Supervisor {
    receiver: mpsc::Receiver<SupervisorMessage>,
    self_sender: mpsc::Sender<SupervisorMessage>,
    workers: AHashMap<AlarmId, Entry>,
    next_generation: u64,
}

impl Supervisor {
    pub fn spawn() -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let supervisor = Supervisor {
            receiver: rx,
            self_sender: tx.clone(),
            workers: AHashMap::new(),
            next_generation: 0,
        };
        tokio::spawn(supervisor.run());
        SupervisorHandle { sender: tx }
    }

    async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            match message {
                SupervisorMessage::Stop => break,
                SupervisorMessage::Register { id, spec } => self.start_worker(id, spec),
                SupervisorMessage::Unregister { id } => {
                    if let Some(entry) = self.workers.remove(&id) {
                        let _ = entry.events.try_send(RemedyEvent::Stop);
                    }
                }
                SupervisorMessage::AlarmSet { id } => {
                    if let Some(entry) = self.workers.get(&id) {
                        let _ = entry.events.send(RemedyEvent::AlarmSet).await;
                    }
                }
                SupervisorMessage::AlarmCleared { id } => {
                    if let Some(entry) = self.workers.get(&id) {
                        let _ = entry.events.send(RemedyEvent::AlarmCleared).await;
                    }
                }
                SupervisorMessage::WorkerExited { id, generation } => {
                    match self.workers.get(&id) {
                        Some(entry) if entry.generation == generation => {
                            warn!(id = %id, "remedy worker task exited, restarting");
                            let spec = entry.spec.clone();
                            self.start_worker(id, spec);
                        }
                        _ => {
                            // explicitly unregistered, or already superseded by a restart.
                        }
                    }
                }
            }
        }
        for (id, entry) in self.workers.drain() {
            info!(id = %id, "supervisor stopping, killing remedy worker");
            let _ = entry.events.try_send(RemedyEvent::Stop);
        }
    }

    fn start_worker(&mut self, id: AlarmId, spec: RemedySpec) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let (worker, events) = RemedyWorker::new(id.clone(), spec.clone());
        let reporter = self.self_sender.clone();
        let worker_id = id.clone();
        tokio::spawn(async move {
            worker.run().await;
            let _ = reporter
                .send(SupervisorMessage::WorkerExited { id: worker_id, generation })
                .await;
        });
        self.workers.insert(id, Entry { spec, events, generation });
    }
}

/// Starts the supervisor task and returns a handle to it.
pub fn spawn() -> SupervisorHandle {
    Supervisor::spawn()
}
