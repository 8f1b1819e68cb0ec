//! Runtime
//!
//! Owns the two process-wide contexts and brings them up and down in a fixed
//! order: scheduler first, bus second on boot; the reverse on shutdown.

use crate::config::*;
use crate::error::KResult;
use crate::event::EventBusContext;
use crate::kernel::SchedulerContext;
use crate::types::KPrio;

/// Stack sizes, priorities and names used at boot
///
/// `Default` takes the board values from [`crate::config`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub sys_wq_stack_size: usize,
    pub sys_wq_prio: KPrio,
    pub sys_wq_name: &'static str,
    pub long_wq_stack_size: usize,
    pub long_wq_prio: KPrio,
    pub long_wq_name: &'static str,
    pub event_stack_size: usize,
    pub event_prio: KPrio,
    pub event_queue_size: usize,
    pub event_task_name: &'static str,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            sys_wq_stack_size: CFG_SYSTEM_WORKQUEUE_STACK_SIZE,
            sys_wq_prio: CFG_SYSTEM_WORKQUEUE_PRIORITY,
            sys_wq_name: CFG_SYSTEM_WORKQUEUE_NAME,
            long_wq_stack_size: CFG_LONG_WQ_STACK_SIZE,
            long_wq_prio: CFG_LONG_WQ_PRIORITY,
            long_wq_name: CFG_LONG_WQ_NAME,
            event_stack_size: CFG_EVENT_TASK_STACK_SIZE,
            event_prio: CFG_EVENT_TASK_PRIO,
            event_queue_size: CFG_EVENT_QUEUE_SIZE,
            event_task_name: CFG_EVENT_TASK_NAME,
        }
    }
}

/// Scheduler and event bus, booted together
pub struct Runtime {
    scheduler: SchedulerContext,
    bus: EventBusContext,
}

impl Runtime {
    /// Start the system work queue, the long work queue and the event bus
    ///
    /// If the bus fails to start, the scheduler is stopped again.
    pub fn boot(cfg: RuntimeConfig) -> KResult<Self> {
        let scheduler = SchedulerContext::init(&cfg)?;

        let bus = EventBusContext::new();
        if let Err(e) = bus.init(&cfg) {
            scheduler.deinit();
            return Err(e);
        }

        crate::info!("runtime booted");
        Ok(Runtime { scheduler, bus })
    }

    /// Stop the bus (waiting for its task to exit), then the work queues
    pub fn shutdown(self) {
        if self.bus.is_running() && self.bus.deinit().is_err() {
            crate::warn!("runtime: event bus did not stop cleanly");
        }
        self.scheduler.deinit();
        crate::info!("runtime stopped");
    }

    pub fn scheduler(&self) -> &SchedulerContext {
        &self.scheduler
    }

    pub fn bus(&self) -> &EventBusContext {
        &self.bus
    }
}
