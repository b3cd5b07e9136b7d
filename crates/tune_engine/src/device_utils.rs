use candle_core::Device;
use candle_nn::VarMap;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;

/// Picks the accelerator once per run. Falls back to CPU without failing.
pub fn select_device(ordinal: usize) -> Device {
    match Device::cuda_if_available(ordinal) {
        Ok(device) => {
            tracing::info!("Device initialized: {:?}", device);
            device
        }
        Err(e) => {
            tracing::info!("CUDA device {} unavailable ({}); using CPU", ordinal, e);
            Device::Cpu
        }
    }
}

/// Writes `varmap` as safetensors while holding an exclusive `{path}.lock`.
pub fn save_varmap_locked(varmap: &VarMap, path: &Path) -> candle_core::Result<()> {
    let lock_path = path.with_extension("lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    let _ = std::fs::remove_file(&lock_path);
    saved
}
