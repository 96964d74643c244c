//! Runtime environment detection
//!
//! Everything the process learns from its environment lives in one
//! [`RuntimeContext`] that is handed to the components at construction.

use crate::consumer::shutdown::ShutdownSignal;
use crate::error::{BridgeError, BridgeResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Connection string injected by the IoT Edge runtime
pub const EDGE_HUB_CONNECTION_STRING: &str = "EdgeHubConnectionString";

/// Connection string for standalone runs
pub const HUB_CONNECTION_STRING: &str = "_HUB_CS";

/// PEM file with the edge hub's CA certificate
pub const EDGE_CA_CERTIFICATE_FILE: &str = "EdgeModuleCACertificateFile";

/// Output route used for events in host-managed mode
pub const EDGE_OUTPUT_ROUTE: &str = "output1";

/// How the process is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Native or containerized process talking to IoT Hub directly
    Standalone,
    /// IoT Edge module talking to the local edge hub
    HostManaged,
}

/// Environment-derived settings plus the process's shutdown signal
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    mode: RuntimeMode,
    connection_string: Option<String>,
    ca_certificate_file: Option<PathBuf>,
    bypass_cert_verification: bool,
    shutdown: Arc<ShutdownSignal>,
}

impl RuntimeContext {
    /// Detect the runtime from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Detect the runtime using `lookup` to read variables
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (mode, connection_string) = match non_empty(EDGE_HUB_CONNECTION_STRING) {
            Some(cs) => {
                info!("IoT Edge detected, use IoT Edge Hub connection string read from environment.");
                (RuntimeMode::HostManaged, Some(cs))
            }
            None => {
                info!("IoT Hub connection string read from environment.");
                (RuntimeMode::Standalone, non_empty(HUB_CONNECTION_STRING))
            }
        };

        Self {
            mode,
            connection_string,
            ca_certificate_file: non_empty(EDGE_CA_CERTIFICATE_FILE).map(PathBuf::from),
            // Edge CA verification does not work in Windows containers
            bypass_cert_verification: cfg!(windows),
            shutdown: Arc::new(ShutdownSignal::new()),
        }
    }

    /// Override the certificate bypass decision
    pub fn with_bypass_cert_verification(mut self, bypass: bool) -> Self {
        self.bypass_cert_verification = bypass;
        self
    }

    /// Detected runtime mode
    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Check whether the IoT Edge runtime manages this process
    pub fn is_host_managed(&self) -> bool {
        self.mode == RuntimeMode::HostManaged
    }

    /// Whether the edge CA certificate may be skipped
    pub fn bypass_cert_verification(&self) -> bool {
        self.bypass_cert_verification
    }

    /// Output route for events, `None` for the default route
    pub fn output_route(&self) -> Option<&str> {
        match self.mode {
            RuntimeMode::HostManaged => Some(EDGE_OUTPUT_ROUTE),
            RuntimeMode::Standalone => None,
        }
    }

    /// The process-wide shutdown signal
    pub fn shutdown(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    /// The ingestion connection string for the detected mode
    pub fn connection_string(&self) -> BridgeResult<&str> {
        self.connection_string
            .as_deref()
            .ok_or(BridgeError::MissingConnectionString)
    }

    /// CA certificate to trust for the edge hub connection
    ///
    /// Required in host-managed mode unless the bypass is active; `None`
    /// otherwise.
    pub fn edge_trust_anchor(&self) -> BridgeResult<Option<Vec<u8>>> {
        if !self.is_host_managed() {
            return Ok(None);
        }
        if self.bypass_cert_verification {
            warn!("Skipping edge CA certificate, certificate verification bypass is active");
            return Ok(None);
        }

        let path = self.ca_certificate_file.as_ref().ok_or_else(|| {
            BridgeError::CertificateError(format!(
                "Missing path to certificate file ({} is not set)",
                EDGE_CA_CERTIFICATE_FILE
            ))
        })?;

        if !path.is_file() {
            return Err(BridgeError::CertificateError(format!(
                "Missing certificate file: {}",
                path.display()
            )));
        }

        let pem = std::fs::read(path).map_err(|e| {
            BridgeError::CertificateError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if pem.is_empty() {
            return Err(BridgeError::CertificateError(format!(
                "Certificate file is empty: {}",
                path.display()
            )));
        }

        info!(path = %path.display(), "Added edge CA certificate");
        Ok(Some(pem))
    }
}
