use log::{info, warn};
use std::io::Write;

use crate::cache::RoomNameMap;
use crate::local::connection::DeviceClient;
use crate::local::error::LocalError;
use crate::models::roborock::RoomMapping;

pub const NO_MAPPING_MESSAGE: &str = "No room mapping returned.";

/// Requests the room mapping and releases the connection afterwards, whatever the outcome.
pub fn fetch_room_mapping<D: DeviceClient>(device: &mut D) -> Result<Vec<RoomMapping>, LocalError> {
    let mapping = device.get_room_mapping();
    if let Err(e) = device.disconnect() {
        warn!("closing the device connection failed: {}", e);
    }
    let mapping = mapping?;
    info!("device returned {} room segment(s)", mapping.len());
    Ok(mapping)
}

/// Prints one line per segment and returns the process exit code.
///
/// Named rooms print as `segment<TAB>name<TAB>(iot_id)`, unknown ones as `segment<TAB>iot_id`.
/// An empty mapping prints a notice and yields 1.
pub fn write_mapping<W: Write>(out: &mut W, mapping: &[RoomMapping], names: &RoomNameMap) -> std::io::Result<i32> {
    if mapping.is_empty() {
        writeln!(out, "{}", NO_MAPPING_MESSAGE)?;
        return Ok(1);
    }

    for room in mapping {
        match names.get(&room.iot_id).filter(|n| !n.is_empty()) {
            Some(name) => writeln!(out, "{}\t{}\t({})", room.segment_id, name, room.iot_id)?,
            None => writeln!(out, "{}\t{}", room.segment_id, room.iot_id)?,
        }
    }
    Ok(0)
}
