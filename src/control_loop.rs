use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tokio::{runtime::Builder, sync::mpsc, time};
use tracing::warn;

use crate::{controller::Controller, error::ControlError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlLoopConfig {
    pub read_period: Duration,
    pub channel_capacity: usize,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self { read_period: Duration::from_millis(10), channel_capacity: 128 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorSnapshot {
    pub ids: Vec<u8>,
    pub positions: Vec<u16>,
    pub in_movement: Vec<bool>,
    pub goal_reached: bool,
    pub timestamp_s: f64,
}

impl MotorSnapshot {
    fn capture(controller: &dyn Controller) -> Self {
        let registry = controller.registry();
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs_f64();
        Self {
            ids: registry.ids(),
            positions: controller.positions(),
            in_movement: registry.iter().map(|s| s.in_movement).collect(),
            goal_reached: controller.goal_reached(),
            timestamp_s: ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotorCommand {
    /// Absolute targets, one per servo in id order.
    SetPositions(Vec<i32>),
    /// Offsets from the current targets, one per servo in id order.
    AddPositions(Vec<i32>),
    SetTorque { enabled: bool },
    GoToBackhoe,
    GoToSleep,
}

impl MotorCommand {
    fn apply(&self, controller: &mut dyn Controller) -> Result<bool, ControlError> {
        match self {
            MotorCommand::SetPositions(p) => controller.set_positions(p),
            MotorCommand::AddPositions(d) => controller.add_positions(d),
            MotorCommand::SetTorque { enabled } => {
                let mut all = true;
                for id in controller.registry().ids() {
                    all &= controller.enable_torque(id, *enabled)?;
                }
                Ok(all)
            }
            MotorCommand::GoToBackhoe => controller.go_to_backhoe(),
            MotorCommand::GoToSleep => controller.go_to_sleep(),
        }
    }
}

/// Handle to a controller running on its own thread.
pub struct ControlLoopHandle {
    tx: mpsc::Sender<MotorCommand>,
    last_snapshot: Arc<Mutex<Result<MotorSnapshot, ControlError>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Box<dyn Controller>>>,
}

impl ControlLoopHandle {
    pub fn push(&self, cmd: MotorCommand) -> Result<(), ControlError> {
        self.tx.blocking_send(cmd).map_err(|_| ControlError::Closed)
    }

    pub fn last_snapshot(&self) -> Result<MotorSnapshot, ControlError> {
        self.last_snapshot.lock().map_err(|_| ControlError::Closed)?.clone()
    }

    pub fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and take the controller back.
    pub fn join(mut self) -> Result<Box<dyn Controller>, ControlError> {
        self.close();
        let worker = self.worker.take().ok_or(ControlError::Closed)?;
        worker.join().map_err(|_| ControlError::Closed)
    }
}

impl Drop for ControlLoopHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect `controller`, then move it onto a worker thread that applies
/// queued commands in order and refreshes telemetry every `read_period`.
pub fn start_control_loop(
    mut controller: Box<dyn Controller>,
    cfg: ControlLoopConfig,
) -> Result<ControlLoopHandle, ControlError> {
    controller.connect()?;
    let missing: Vec<u8> = controller.registry().iter().filter(|s| !s.is_online()).map(|s| s.id).collect();
    if !missing.is_empty() {
        return Err(ControlError::MissingMotors(missing));
    }

    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| ControlError::Communication(format!("control loop runtime: {e}")))?;

    let (tx, mut rx) = mpsc::channel::<MotorCommand>(cfg.channel_capacity);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);

    let snapshot = Arc::new(Mutex::new(Ok(MotorSnapshot::capture(controller.as_ref()))));
    let snapshot_clone = Arc::clone(&snapshot);

    let worker = std::thread::spawn(move || {
        runtime.block_on(async move {
            let mut interval = time::interval(cfg.read_period);

            loop {
                tokio::select! {
                    Some(cmd) = rx.recv() => {
                        match cmd.apply(controller.as_mut()) {
                            Ok(true) => {}
                            Ok(false) => warn!(?cmd, "command not applied"),
                            Err(e) => warn!(?cmd, "command failed: {e}"),
                        }
                    }
                    _ = interval.tick() => {
                        let read = controller
                            .update_all_infos()
                            .map(|_| MotorSnapshot::capture(controller.as_ref()));
                        if let Ok(mut guard) = snapshot_clone.lock() {
                            *guard = read;
                        }
                    }
                }

                if stop_clone.load(Ordering::SeqCst) {
                    break;
                }
            }
            controller
        })
    });

    Ok(ControlLoopHandle { tx, last_snapshot: snapshot, stop, worker: Some(worker) })
}
