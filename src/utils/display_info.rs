use drm::control::connector;
use libdisplay_info::info::Info as DisplayInfo;

use crate::device::KmsDevice;

/// parsed EDID of a connector, `None` when absent or unparseable
pub fn for_connector(device: &impl KmsDevice, connector: connector::Handle) -> Option<DisplayInfo> {
    let props = device.properties(connector).ok()?;

    let edid = props.into_iter().find(|prop|prop.name == "EDID")?;
    if edid.value == 0 {
        return None;
    }
    let data = device.property_blob(edid.value).ok()?;

    DisplayInfo::parse_edid(&data).ok()
}

/// `make model`, with either part falling back to `Unknown`
pub fn describe(info: &DisplayInfo) -> String {
    let make = info.make().unwrap_or_else(||"Unknown".into());
    let model = info.model().unwrap_or_else(||"Unknown".into());
    format!("{make} {model}")
}
