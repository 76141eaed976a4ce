//! Core plugin trait and types

use crate::error::Result;
use relaygate_core::{Message, Packet};
use std::fmt;

/// What the worker thread does after [`Plugin::main`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainAction {
    /// Enter the queue dispatch loop
    MessageLoop,
    /// The plugin ran its own loop and is done
    Finished,
}

/// A processing unit running on its own worker thread
///
/// Callbacks never run concurrently. [`init`](Self::init) runs on the thread
/// that starts the plugin and [`exit_handler`](Self::exit_handler) on the
/// thread that unloads it; everything else runs on the worker thread.
pub trait Plugin: Send + fmt::Debug {
    /// Called once right after construction, before the worker is spawned
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Worker thread entry point
    ///
    /// Processing plugins return [`MainAction::MessageLoop`]. Source plugins
    /// may run their own loop here, polling
    /// [`PluginHost::exit_requested`](crate::PluginHost::exit_requested),
    /// and return [`MainAction::Finished`] once asked to stop.
    fn main(&mut self) -> MainAction {
        MainAction::MessageLoop
    }

    /// Handle a packet taken from the queue
    ///
    /// The runtime releases the queue's reference after this returns. Keep a
    /// clone and forward it to retain the packet.
    fn process_packet(&mut self, packet: &Packet) -> bool;

    /// Handle a published value
    fn process_message(&mut self, _message: &Message) -> bool {
        true
    }

    /// Called when a timed dequeue expires with nothing queued
    fn message_timeout(&mut self) -> bool {
        true
    }

    /// Called once before the instance is destroyed, after the worker exits
    fn exit_handler(&mut self) {}
}
