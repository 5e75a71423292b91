//! Default text-output parser for the configured probe program. Expects
//! `v4l2-ctl`-shaped key/value output for `--info` and a simple table for
//! `--list-formats-ext`; either may be swapped out via [`super::DeviceParser`]
//! for a different probe program's text shape.

use crate::error::{AppError, Result};

use super::traits::DeviceParser;
use super::types::{DeviceCapabilities, DeviceFormat};

pub struct TextFormatParser;

impl DeviceParser for TextFormatParser {
    fn parse_device_info(&self, raw: &str) -> Result<DeviceCapabilities> {
        let mut caps = DeviceCapabilities::default();
        for line in raw.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();
            match key.as_str() {
                "driver name" => caps.driver = value,
                "card type" => caps.card = value,
                "bus info" => caps.bus = value,
                "driver version" => caps.version = value,
                "capabilities" => caps.capabilities = split_tags(&value),
                "device caps" => caps.device_caps = split_tags(&value),
                _ => {}
            }
        }
        if caps.driver.is_empty() && caps.card.is_empty() {
            return Err(AppError::Internal("probe output did not contain recognizable device info".to_string()));
        }
        Ok(caps)
    }

    fn parse_device_formats(&self, raw: &str) -> Result<Vec<DeviceFormat>> {
        let mut formats = Vec::new();
        let mut current_pixfmt: Option<String> = None;
        let mut current_wh: Option<(u32, u32)> = None;
        let mut current_rates: Vec<f64> = Vec::new();

        for line in raw.lines() {
            let trimmed = line.trim();
            if let Some(pf) = trimmed.strip_prefix("[") {
                if let Some(end) = pf.find(']') {
                    let rest = &pf[end + 1..];
                    if let Some(start) = rest.find('\'') {
                        if let Some(stop) = rest[start + 1..].find('\'') {
                            current_pixfmt = Some(rest[start + 1..start + 1 + stop].to_string());
                        }
                    }
                }
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("Size:") {
                flush_format(&mut formats, &current_pixfmt, current_wh, &current_rates);
                current_rates.clear();
                current_wh = parse_resolution(rest);
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("Interval:") {
                if let Some(fps) = parse_fps(rest) {
                    current_rates.push(fps);
                }
            }
        }
        flush_format(&mut formats, &current_pixfmt, current_wh, &current_rates);

        Ok(formats)
    }
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|s| s.trim_matches(|c| c == '(' || c == ')').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_resolution(rest: &str) -> Option<(u32, u32)> {
    let rest = rest.trim();
    let dims = rest.split_whitespace().next()?;
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn parse_fps(rest: &str) -> Option<f64> {
    let marker = "(";
    let start = rest.find(marker)?;
    let text = &rest[start + marker.len()..];
    let end = text.find(" fps")?;
    text[..end].trim().parse().ok()
}

fn flush_format(
    out: &mut Vec<DeviceFormat>,
    pixfmt: &Option<String>,
    wh: Option<(u32, u32)>,
    rates: &[f64],
) {
    if let (Some(pf), Some((w, h))) = (pixfmt, wh) {
        out.push(DeviceFormat {
            pixel_format: pf.clone(),
            width: w,
            height: h,
            frame_rates: rates.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_device_info() {
        let raw = "Driver Info:\n\tDriver name      : uvcvideo\n\tCard type        : USB Camera\n\tBus info         : usb-0000:00:14.0-1\n\tDriver version   : 6.6.0\n\tCapabilities     : 0x84a00001\n\tDevice Caps      : 0x04200001\n";
        let caps = TextFormatParser.parse_device_info(raw).unwrap();
        assert_eq!(caps.driver, "uvcvideo");
        assert_eq!(caps.card, "USB Camera");
    }

    #[test]
    fn empty_info_output_is_an_error() {
        assert!(TextFormatParser.parse_device_info("").is_err());
    }

    #[test]
    fn parses_formats_with_resolutions_and_rates() {
        let raw = "ioctl: VIDIOC_ENUM_FMT\n\t[0]: 'MJPG' (Motion-JPEG, compressed)\n\t\tSize: Discrete 1920x1080\n\t\t\tInterval: Discrete 0.033s (30.000 fps)\n\t\tSize: Discrete 1280x720\n\t\t\tInterval: Discrete 0.033s (30.000 fps)\n\t\t\tInterval: Discrete 0.017s (60.000 fps)\n";
        let formats = TextFormatParser.parse_device_formats(raw).unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].pixel_format, "MJPG");
        assert_eq!(formats[0].width, 1920);
        assert_eq!(formats[1].frame_rates.len(), 2);
    }
}
