use log::info;
use std::io::Write;

use crate::cache::load_room_name_map;
use crate::client::CloudApi;
use crate::config::Config;
use crate::local::connection::DeviceClient;
use crate::models::roborock::DeviceIdentity;
use crate::secrets::SecretStore;
use crate::services::mapping::{fetch_room_mapping, write_mapping};
use crate::services::refresh::refresh_home_data_cache;

/// End-to-end run: credentials, cloud refresh, device query, printed mapping.
///
/// The device credentials are read before anything touches the network so that a broken
/// secret store fails fast. Returns the process exit code.
pub fn run_lookup<S, C, D, W>(
    cfg: &Config,
    secrets: &S,
    make_cloud: impl FnOnce(&str) -> C,
    open_device: impl FnOnce(DeviceIdentity) -> D,
    prompt: impl FnOnce(&str) -> Result<String, String>,
    out: &mut W,
) -> Result<i32, String>
where
    S: SecretStore,
    C: CloudApi,
    D: DeviceClient,
    W: Write,
{
    let duid = secrets.read(&cfg.secrets.duid, "DUID").map_err(|e| e.to_string())?;
    let local_key = secrets
        .read(&cfg.secrets.local_key, "local key")
        .map_err(|e| e.to_string())?;

    refresh_home_data_cache(cfg, secrets, make_cloud, prompt)?;

    let identity = DeviceIdentity {
        duid,
        name: cfg.name.clone(),
        local_key,
        product_id: cfg.product_id.clone(),
        model: cfg.model.clone(),
        host: cfg.host,
    };
    info!("querying room mapping from {} at {}", identity.model, identity.host);
    let mut device = open_device(identity);
    let mapping = fetch_room_mapping(&mut device).map_err(|e| format!("get_room_mapping failed: {}", e))?;

    let names = load_room_name_map(&cfg.cache_files);
    write_mapping(out, &mapping, &names).map_err(|e| format!("write output failed: {}", e))
}
