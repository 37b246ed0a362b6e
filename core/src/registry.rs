//! Owned table of live emulator instances

use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::audio::MuteState;
use crate::config::Config;
use crate::error::RegistryError;
use crate::instance::{EmuInstance, InstanceId};
use crate::machine::{MachineFactory, instance_suffix};

/// Maximum number of instances alive at once.
pub const MAX_INSTANCES: usize = 16;

/// Creates, owns and destroys emulator instances.
///
/// Ids are small integers; the lowest free id is reused. Every instance
/// shares one [`MuteState`], which is updated on create, destroy and focus
/// changes.
pub struct InstanceRegistry {
    config: Config,
    firmware_dir: Option<PathBuf>,
    mute: Arc<MuteState>,
    instances: HashMap<InstanceId, EmuInstance>,
}

impl InstanceRegistry {
    pub fn new(config: Config) -> Self {
        let mute = Arc::new(MuteState::new(config.audio.multi_instance));
        Self {
            config,
            firmware_dir: None,
            mute,
            instances: HashMap::new(),
        }
    }

    /// Store firmware saves in `dir`, one file per instance.
    pub fn with_firmware_dir(mut self, dir: PathBuf) -> Self {
        self.firmware_dir = Some(dir);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mute(&self) -> &Arc<MuteState> {
        &self.mute
    }

    pub fn create(&mut self, factory: Box<dyn MachineFactory>) -> Result<InstanceId, RegistryError> {
        let id = (0..MAX_INSTANCES)
            .find(|id| !self.instances.contains_key(id))
            .ok_or(RegistryError::Full(MAX_INSTANCES))?;

        let firmware_save = self
            .firmware_dir
            .as_ref()
            .map(|dir| dir.join(format!("firmware.bin{}", instance_suffix(id))));
        let instance = EmuInstance::new(id, &self.config, factory, self.mute.clone(), firmware_save);
        self.instances.insert(id, instance);

        self.mute.set_instance_count(self.instances.len());
        self.refresh_mute();
        info!("Emulator instance {} created ({} live)", id, self.instances.len());
        Ok(id)
    }

    /// Stop and remove one instance. Blocks until its worker has exited.
    pub fn destroy(&mut self, id: InstanceId) -> Result<(), RegistryError> {
        let instance = self
            .instances
            .remove(&id)
            .ok_or(RegistryError::UnknownInstance(id))?;
        drop(instance);

        if self.mute.focused() == Some(id) {
            self.mute.set_focused(None);
        }
        self.mute.set_instance_count(self.instances.len());
        self.refresh_mute();
        info!("Emulator instance {} destroyed ({} live)", id, self.instances.len());
        Ok(())
    }

    pub fn destroy_all(&mut self) {
        let count = self.instances.len();
        self.instances.clear();
        self.mute.set_focused(None);
        self.mute.set_instance_count(0);
        if count > 0 {
            info!("Destroyed {} emulator instances", count);
        }
    }

    pub fn get(&self, id: InstanceId) -> Option<&EmuInstance> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut EmuInstance> {
        self.instances.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.instances.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Move window focus. The previously focused instance sees a focus
    /// loss, the new one a focus gain.
    pub fn set_focus(&mut self, id: Option<InstanceId>) -> Result<(), RegistryError> {
        if let Some(id) = id {
            if !self.instances.contains_key(&id) {
                return Err(RegistryError::UnknownInstance(id));
            }
        }

        let previous = self.mute.focused();
        if previous != id {
            if let Some(instance) = previous.and_then(|p| self.instances.get_mut(&p)) {
                instance.focus_lost();
            }
            if let Some(instance) = id.and_then(|i| self.instances.get_mut(&i)) {
                instance.focus_gained();
            }
        }

        self.mute.set_focused(id);
        self.refresh_mute();
        Ok(())
    }

    pub fn focused(&self) -> Option<InstanceId> {
        self.mute.focused()
    }

    /// Pause every instance except `source`.
    pub fn broadcast_pause(&self, source: Option<InstanceId>) {
        for (id, instance) in self.others(source) {
            if let Err(e) = instance.pause() {
                warn!("Instance {}: broadcast pause failed: {}", id, e);
            }
        }
    }

    /// Unpause every instance except `source`.
    pub fn broadcast_unpause(&self, source: Option<InstanceId>) {
        for (id, instance) in self.others(source) {
            if let Err(e) = instance.unpause() {
                warn!("Instance {}: broadcast unpause failed: {}", id, e);
            }
        }
    }

    fn others(&self, source: Option<InstanceId>) -> impl Iterator<Item = (&InstanceId, &EmuInstance)> {
        self.instances.iter().filter(move |(id, _)| Some(**id) != source)
    }

    fn refresh_mute(&self) {
        for instance in self.instances.values() {
            instance.refresh_mute();
        }
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
