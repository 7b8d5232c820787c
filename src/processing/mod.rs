#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod adapter;
mod ports;
mod pump;
mod worker;

#[cfg(test)]
mod tests;

pub use ports::{
    BatchOutcome, FlowLogic, HuntGateway, NotificationQueue, PortFuture, WorkerStore,
};
pub use pump::{NotificationHandler, NotificationPump, PumpHandle};
pub use worker::{FlowWorker, ProcessOutcome};
