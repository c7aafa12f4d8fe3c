// Copyright (c) 2024 Botho Foundation

//! Signal channels connecting handlers to the periodic routines.
//!
//! Most channels carry no payload: only the presence of a signal means
//! anything, and producers use lossy sends so a full channel is the
//! same as an already-pending signal. The two super-side intake
//! channels are the exception and carry whole decoded messages.

use crate::messages::{PongMsg, RegisterMsg};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

/// Channels present only on super-nodes.
#[derive(Debug)]
pub struct SuperEvents {
    register_tx: mpsc::Sender<RegisterMsg>,
    register_rx: Mutex<Option<mpsc::Receiver<RegisterMsg>>>,
    pong_tx: mpsc::Sender<PongMsg>,
    pong_rx: Mutex<Option<mpsc::Receiver<PongMsg>>>,
    nh_changed_tx: mpsc::Sender<()>,
    nh_changed_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

/// The device's event bus.
#[derive(Debug)]
pub struct EventBus {
    try_endpoint_tx: mpsc::Sender<()>,
    try_endpoint_rx: Mutex<Option<mpsc::Receiver<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    supernode_ok_tx: mpsc::Sender<()>,
    supernode_ok_rx: Mutex<Option<mpsc::Receiver<()>>>,
    super_events: Option<SuperEvents>,
}

impl EventBus {
    /// Build the bus; super-side channels exist only when `is_super`.
    pub fn new(is_super: bool) -> Self {
        let (try_endpoint_tx, try_endpoint_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (supernode_ok_tx, supernode_ok_rx) = mpsc::channel(1);

        let super_events = is_super.then(|| {
            let (register_tx, register_rx) = mpsc::channel(64);
            let (pong_tx, pong_rx) = mpsc::channel(64);
            let (nh_changed_tx, nh_changed_rx) = mpsc::channel(1);
            SuperEvents {
                register_tx,
                register_rx: Mutex::new(Some(register_rx)),
                pong_tx,
                pong_rx: Mutex::new(Some(pong_rx)),
                nh_changed_tx,
                nh_changed_rx: Mutex::new(Some(nh_changed_rx)),
            }
        });

        Self {
            try_endpoint_tx,
            try_endpoint_rx: Mutex::new(Some(try_endpoint_rx)),
            shutdown_tx,
            shutdown_rx,
            supernode_ok_tx,
            supernode_ok_rx: Mutex::new(Some(supernode_ok_rx)),
            super_events,
        }
    }

    /// Ask the endpoint driver to run a try-list pass. Lossy.
    pub fn notify_try_endpoint(&self) {
        let _ = self.try_endpoint_tx.try_send(());
    }

    /// Take the endpoint driver's receiver. Single consumer.
    pub fn take_try_endpoint_rx(&self) -> Option<mpsc::Receiver<()>> {
        self.try_endpoint_rx.lock().unwrap().take()
    }

    /// Flip the shutdown flag; every routine observes it.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A watch handle on the shutdown flag.
    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Announce that a super-node accepted us. Lossy.
    pub fn notify_supernode_ok(&self) {
        let _ = self.supernode_ok_tx.try_send(());
    }

    /// Take the registration routine's receiver. Single consumer.
    pub fn take_supernode_ok_rx(&self) -> Option<mpsc::Receiver<()>> {
        self.supernode_ok_rx.lock().unwrap().take()
    }

    /// Hand an accepted registration to the super-node service.
    pub fn publish_register(&self, msg: RegisterMsg) {
        if let Some(events) = &self.super_events {
            let _ = events.register_tx.try_send(msg);
        }
    }

    /// Hand a pong to the super-node service.
    pub fn publish_pong(&self, msg: PongMsg) {
        if let Some(events) = &self.super_events {
            let _ = events.pong_tx.try_send(msg);
        }
    }

    /// Tell the super-node service its next-hop table changed. Lossy.
    pub fn notify_nh_changed(&self) {
        if let Some(events) = &self.super_events {
            let _ = events.nh_changed_tx.try_send(());
        }
    }

    /// Take the super-side registration intake. Single consumer.
    pub fn take_register_rx(&self) -> Option<mpsc::Receiver<RegisterMsg>> {
        self.super_events
            .as_ref()
            .and_then(|e| e.register_rx.lock().unwrap().take())
    }

    /// Take the super-side pong intake. Single consumer.
    pub fn take_pong_rx(&self) -> Option<mpsc::Receiver<PongMsg>> {
        self.super_events
            .as_ref()
            .and_then(|e| e.pong_rx.lock().unwrap().take())
    }

    /// Take the super-side table-changed intake. Single consumer.
    pub fn take_nh_changed_rx(&self) -> Option<mpsc::Receiver<()>> {
        self.super_events
            .as_ref()
            .and_then(|e| e.nh_changed_rx.lock().unwrap().take())
    }
}
