//! Process-wide transport runtime
//!
//! The vendor library has a global init/deinit pair that must run exactly
//! once per process. The runtime owns that state explicitly: init-on-demand
//! guarded by a flag, one guaranteed teardown driven by the top-level
//! orchestrator. It is also the factory for [`Session`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use log::{debug, info};

use crate::Result;
use crate::config::SessionOptions;
use crate::device::{Account, CameraDescriptor};
use crate::session::Session;
use crate::transport::TransportBinding;

/// Process-level transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local UDP port; 0 lets the vendor library pick one
    pub udp_port: u16,
    /// Requested number of simultaneous AV channels
    pub max_channels: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            udp_port: 0,
            max_channels: 1,
        }
    }
}

/// Owner of the vendor library's global state
pub struct TransportRuntime {
    binding: Arc<dyn TransportBinding>,
    config: TransportConfig,
    initialized: AtomicBool,
    granted_channels: AtomicI32,
}

impl TransportRuntime {
    /// Wrap an adapter chosen at startup from configuration
    pub fn new(binding: Arc<dyn TransportBinding>, config: TransportConfig) -> Self {
        Self {
            binding,
            config,
            initialized: AtomicBool::new(false),
            granted_channels: AtomicI32::new(0),
        }
    }

    pub fn binding(&self) -> Arc<dyn TransportBinding> {
        Arc::clone(&self.binding)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// AV channels actually granted by the library, once initialized
    pub fn granted_channels(&self) -> i32 {
        self.granted_channels.load(Ordering::SeqCst)
    }

    /// Initialize the vendor library. Repeated calls are no-ops.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self
            .binding
            .initialize(self.config.udp_port, self.config.max_channels)
        {
            Ok(granted) => {
                self.granted_channels.store(granted, Ordering::SeqCst);
                info!(
                    "transport runtime up (udp_port={}, channels={})",
                    self.config.udp_port, granted
                );
                Ok(())
            }
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Tear down the vendor library. Repeated calls are no-ops.
    pub fn deinitialize(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        self.binding.deinitialize();
        debug!("transport runtime down");
    }

    /// Build a session for one camera stream.
    ///
    /// Substreams use a trimmed caller identity so the camera accounts them
    /// as a second client.
    pub fn session(
        &self,
        account: &Account,
        camera: &CameraDescriptor,
        options: SessionOptions,
    ) -> Session {
        let account = if options.substream {
            account.for_substream()
        } else {
            account.clone()
        };
        Session::new(self.binding(), account, camera.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTransport;

    #[test]
    fn test_initialize_is_idempotent() {
        let stub = StubTransport::shared();
        let runtime = TransportRuntime::new(stub.clone(), TransportConfig::default());

        runtime.initialize().unwrap();
        runtime.initialize().unwrap();

        assert!(runtime.is_initialized());
        assert_eq!(stub.init_count(), 1);
    }

    #[test]
    fn test_double_deinitialize_is_noop() {
        let stub = StubTransport::shared();
        let runtime = TransportRuntime::new(stub.clone(), TransportConfig::default());

        runtime.initialize().unwrap();
        runtime.deinitialize();
        runtime.deinitialize();

        assert!(!runtime.is_initialized());
        assert_eq!(stub.deinit_count(), 1);
    }

    #[test]
    fn test_deinitialize_before_init_is_noop() {
        let stub = StubTransport::shared();
        let runtime = TransportRuntime::new(stub.clone(), TransportConfig::default());

        runtime.deinitialize();
        assert_eq!(stub.deinit_count(), 0);
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let stub = StubTransport::shared();
        stub.fail_initialize(crate::transport::status::ER_NOT_INITIALIZED);
        let runtime = TransportRuntime::new(stub.clone(), TransportConfig::default());

        assert!(runtime.initialize().is_err());
        assert!(!runtime.is_initialized());

        runtime.initialize().unwrap();
        assert!(runtime.is_initialized());
    }
}
