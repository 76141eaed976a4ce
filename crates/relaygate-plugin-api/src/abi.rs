//! Module entry points
//!
//! A plugin module is either linked statically and registered with the
//! runtime's catalog as a [`PluginConstructor`], or built as a `cdylib`
//! exporting the three symbols generated by [`declare_plugin!`]. Dynamic
//! modules must be built with the same toolchain and SDK version as the
//! host; [`ABI_VERSION`] is checked at load time.
//!
//! [`declare_plugin!`]: crate::declare_plugin

use crate::error::PluginError;
use crate::host::Host;
use crate::plugin::Plugin;
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use tracing::error;

/// Version of the dynamic module contract
pub const ABI_VERSION: u32 = 1;

/// Symbol returning [`ABI_VERSION`]
pub const ABI_VERSION_SYMBOL: &[u8] = b"relaygate_plugin_abi_version";

/// Symbol constructing an instance
pub const CREATE_SYMBOL: &[u8] = b"relaygate_plugin_create";

/// Symbol destroying an instance
pub const DESTROY_SYMBOL: &[u8] = b"relaygate_plugin_destroy";

/// Builds an uninitialized plugin instance bound to its host
pub type PluginConstructor = fn(Host) -> Box<dyn Plugin>;

/// `relaygate_plugin_abi_version` signature
pub type RawAbiVersionFn = unsafe extern "C" fn() -> u32;

/// `relaygate_plugin_create` signature
pub type RawCreateFn = unsafe extern "C" fn(host: *mut c_void) -> *mut c_void;

/// `relaygate_plugin_destroy` signature
pub type RawDestroyFn = unsafe extern "C" fn(instance: *mut c_void);

/// Construct an instance and run its `init`
///
/// On failure `exit_handler` runs and the instance is dropped. A panic in
/// the constructor or in `init` is reported as [`PluginError::Panicked`].
pub fn create_instance(host: Host, ctor: PluginConstructor) -> Result<Box<dyn Plugin>, PluginError> {
    let name = host.name().to_string();

    let created = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut instance = ctor(host);
        match instance.init() {
            Ok(()) => Ok(instance),
            Err(e) => {
                instance.exit_handler();
                Err(e)
            }
        }
    }));

    match created {
        Ok(Ok(instance)) => Ok(instance),
        Ok(Err(e)) => {
            error!(plugin = %name, error = %e, "Plugin initialization failed");
            Err(e)
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref()).to_string();
            error!(plugin = %name, reason = %reason, "Plugin panicked during initialization");
            Err(PluginError::Panicked(reason))
        }
    }
}

/// Run `exit_handler`, then drop the instance
///
/// Returns false when either panicked.
pub fn destroy_instance(mut instance: Box<dyn Plugin>) -> bool {
    let destroyed = panic::catch_unwind(AssertUnwindSafe(move || {
        instance.exit_handler();
        drop(instance);
    }));

    match destroyed {
        Ok(()) => true,
        Err(payload) => {
            error!(reason = %panic_message(payload.as_ref()), "Plugin destructor panicked");
            false
        }
    }
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Body of a module's `relaygate_plugin_create`
///
/// Returns null when initialization fails or panics.
///
/// # Safety
///
/// `host` must be null or a pointer produced by [`RawEntryPoints::create`].
pub unsafe fn export_create(host: *mut c_void, ctor: PluginConstructor) -> *mut c_void {
    if host.is_null() {
        return ptr::null_mut();
    }

    let host: Host = *Box::from_raw(host.cast::<Host>());
    match create_instance(host, ctor) {
        Ok(instance) => Box::into_raw(Box::new(instance)).cast(),
        Err(_) => ptr::null_mut(),
    }
}

/// Body of a module's `relaygate_plugin_destroy`
///
/// # Safety
///
/// `instance` must be null or a pointer produced by [`RawEntryPoints::destroy`].
pub unsafe fn export_destroy(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }

    let instance: Box<Box<dyn Plugin>> = Box::from_raw(instance.cast());
    destroy_instance(*instance);
}

/// Resolved entry points of a dynamic module
#[derive(Debug, Clone, Copy)]
pub struct RawEntryPoints {
    /// Resolved `relaygate_plugin_create`
    pub create: RawCreateFn,
    /// Resolved `relaygate_plugin_destroy`
    pub destroy: RawDestroyFn,
}

impl RawEntryPoints {
    /// Construct and initialize an instance inside the module
    ///
    /// # Safety
    ///
    /// The pointers must come from a still-loaded module whose reported ABI
    /// version equals [`ABI_VERSION`].
    pub unsafe fn create(&self, host: Host) -> Option<Box<dyn Plugin>> {
        let raw = (self.create)(Box::into_raw(Box::new(host)).cast());
        if raw.is_null() {
            None
        } else {
            Some(*Box::from_raw(raw.cast::<Box<dyn Plugin>>()))
        }
    }

    /// Hand an instance back to the module that created it
    ///
    /// # Safety
    ///
    /// Same contract as [`create`](Self::create); `instance` must have been
    /// created by this module.
    pub unsafe fn destroy(&self, instance: Box<dyn Plugin>) {
        (self.destroy)(Box::into_raw(Box::new(instance)).cast());
    }
}

/// Export a plugin constructor as dynamic module entry points
///
/// ```rust,ignore
/// relaygate_plugin_api::declare_plugin!(MyPlugin::construct);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($ctor:path) => {
        #[no_mangle]
        pub unsafe extern "C" fn relaygate_plugin_abi_version() -> u32 {
            $crate::abi::ABI_VERSION
        }

        #[no_mangle]
        pub unsafe extern "C" fn relaygate_plugin_create(
            host: *mut ::std::ffi::c_void,
        ) -> *mut ::std::ffi::c_void {
            $crate::abi::export_create(host, $ctor)
        }

        #[no_mangle]
        pub unsafe extern "C" fn relaygate_plugin_destroy(instance: *mut ::std::ffi::c_void) {
            $crate::abi::export_destroy(instance)
        }
    };
}
