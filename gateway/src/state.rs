use std::sync::Arc;

use signer::{Signer, SignerOptions};

use crate::settings::SettingsStore;

pub struct AppState {
    pub settings: SettingsStore,
    pub signer: Signer,
}

impl AppState {
    /// The signer resolves actions through the same settings file used for
    /// authentication.
    pub fn new(settings: SettingsStore, options: SignerOptions) -> Self {
        let signer = Signer::new(Arc::new(settings.clone()), options);
        Self { settings, signer }
    }
}
