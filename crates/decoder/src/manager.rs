//! Session factory: probes devices and builds decode sessions.
//!
//! The `SessionFactory` handles:
//! - Enumerating decode devices through a [`DeviceProvider`]
//! - Validating session configuration before any hardware is touched
//! - Opening the device and binding a parser to a new [`DecodeSession`]
//! - Routing session logs to an injected `tracing` dispatcher

use std::sync::Arc;

use tracing::{debug, info, warn, Dispatch};

use nvb_common::{DecodeError, SessionConfig, VideoCodec};

use crate::engine::DeviceProvider;
use crate::session::DecodeSession;

/// Builds [`DecodeSession`]s on devices from one provider.
#[derive(Clone)]
pub struct SessionFactory {
    provider: Arc<dyn DeviceProvider>,
    /// Logging collaborator handed to every session; `None` uses the
    /// caller's default subscriber.
    dispatch: Option<Dispatch>,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("dispatch", &self.dispatch.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionFactory {
    pub fn new(provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            provider,
            dispatch: None,
        }
    }

    /// Send all session logs to `dispatch`, including those emitted from
    /// parser callbacks.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Name of the device at `ordinal`, or `DeviceUnavailable`.
    pub fn probe(&self, ordinal: usize) -> Result<String, DecodeError> {
        self.logged(|| {
            let count = self.provider.device_count()?;
            if ordinal >= count {
                debug!(ordinal, count, "No device at ordinal");
                return Err(DecodeError::DeviceUnavailable { ordinal, count });
            }
            let name = self.provider.device_name(ordinal)?;
            debug!(ordinal, device = %name, "Probed decode device");
            Ok(name)
        })
    }

    /// Names of every device, in ordinal order.
    pub fn devices(&self) -> Result<Vec<String>, DecodeError> {
        let count = self.provider.device_count()?;
        (0..count)
            .map(|ordinal| self.provider.device_name(ordinal).map_err(DecodeError::from))
            .collect()
    }

    /// Codecs the provider can build sessions for.
    pub fn supported_codecs(&self) -> Vec<VideoCodec> {
        VideoCodec::ALL
            .iter()
            .copied()
            .filter(|&codec| self.provider.supports_codec(codec))
            .collect()
    }

    /// Validate `config`, open its device, and bind a new session to it.
    pub fn create_session(&self, config: &SessionConfig) -> Result<DecodeSession, DecodeError> {
        config.validate()?;
        if !self.provider.supports_codec(config.codec) {
            return Err(DecodeError::UnsupportedCodec(config.codec));
        }

        let device_name = self.probe(config.device_ordinal)?;
        let device = self.provider.open(config.device_ordinal).map_err(|e| {
            self.logged(|| warn!(device = %device_name, error = %e, "Failed to open decode device"));
            DecodeError::from(e)
        })?;

        let session = DecodeSession::open(device, config.clone(), self.dispatch.clone())?;
        self.logged(|| {
            info!(
                device = %device_name,
                ordinal = config.device_ordinal,
                codec = config.codec.display_name(),
                "Created decode session"
            )
        });
        Ok(session)
    }

    fn logged<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(d) => tracing::dispatcher::with_default(d, f),
            None => f(),
        }
    }
}

#[cfg(feature = "nvdec")]
impl SessionFactory {
    /// Factory backed by the system's NVIDIA driver.
    ///
    /// Fails when nvcuvid cannot be loaded.
    pub fn nvdec() -> Result<Self, DecodeError> {
        let provider = crate::nvdec::NvdecProvider::load()?;
        Ok(Self::new(Arc::new(provider)))
    }
}
