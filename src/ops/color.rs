use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::model::config::UiConfig;
use crate::model::task::{TaskNode, TaskStatus, ValidationError};

/// An RGB colour, printed as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorKey(pub u8, pub u8, pub u8);

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

impl Serialize for ColorKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

fn parse_hex_color(hex: &str) -> Option<ColorKey> {
    let hex = hex.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(ColorKey(r, g, b))
}

/// What a task's colour is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    #[default]
    Assignee,
    Status,
    Project,
}

impl FromStr for ColorMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assignee" => Ok(ColorMode::Assignee),
            "status" => Ok(ColorMode::Status),
            "project" => Ok(ColorMode::Project),
            _ => Err(ValidationError::new(
                "color_mode",
                format!("expected assignee, status or project, got '{}'", s),
            )),
        }
    }
}

/// Palette plus per-status colours.
#[derive(Debug, Clone)]
pub struct ColorScheme {
    palette: Vec<ColorKey>,
    status: HashMap<TaskStatus, ColorKey>,
    fallback: ColorKey,
}

impl Default for ColorScheme {
    fn default() -> Self {
        let palette = vec![
            ColorKey(0x90, 0xCA, 0xF9),
            ColorKey(0x81, 0xC7, 0x84),
            ColorKey(0xFF, 0xB7, 0x4D),
            ColorKey(0xBA, 0x68, 0xC8),
            ColorKey(0x4D, 0xB6, 0xAC),
            ColorKey(0x79, 0x86, 0xCB),
            ColorKey(0xF0, 0x62, 0x92),
            ColorKey(0xA1, 0x88, 0x7F),
            ColorKey(0x64, 0xB5, 0xF6),
            ColorKey(0xFF, 0xD5, 0x4F),
        ];
        let mut status = HashMap::new();
        status.insert(TaskStatus::Todo, ColorKey(0xFF, 0xF9, 0xC4));
        status.insert(TaskStatus::InProgress, ColorKey(0xBB, 0xDE, 0xFB));
        status.insert(TaskStatus::Review, ColorKey(0xFF, 0xE0, 0x82));
        status.insert(TaskStatus::Done, ColorKey(0xC8, 0xE6, 0xC9));
        ColorScheme {
            palette,
            status,
            fallback: ColorKey(0xEE, 0xEE, 0xEE),
        }
    }
}

impl ColorScheme {
    /// Build a scheme from the `[ui]` config, falling back to defaults for
    /// anything missing or unparseable.
    pub fn from_config(ui: &UiConfig) -> Self {
        let mut scheme = ColorScheme::default();

        let palette: Vec<ColorKey> = ui
            .palette
            .iter()
            .filter_map(|value| {
                let color = parse_hex_color(value);
                if color.is_none() {
                    tracing::warn!(value = %value, "ignoring palette entry that is not #RRGGBB");
                }
                color
            })
            .collect();
        if !palette.is_empty() {
            scheme.palette = palette;
        }

        for (key, value) in &ui.status_colors {
            match (key.parse::<TaskStatus>(), parse_hex_color(value)) {
                (Ok(status), Some(color)) => {
                    scheme.status.insert(status, color);
                }
                _ => tracing::warn!(status = %key, value = %value, "ignoring status colour"),
            }
        }
        scheme
    }

    pub fn status_color(&self, status: TaskStatus) -> ColorKey {
        self.status.get(&status).copied().unwrap_or(self.fallback)
    }

    /// Palette slot for an arbitrary key (assignee or project id).
    pub fn palette_color(&self, key: u64) -> ColorKey {
        if self.palette.is_empty() {
            return self.fallback;
        }
        self.palette[(key % self.palette.len() as u64) as usize]
    }
}

/// Colour for a task under `mode`. Unassigned tasks fall back to their
/// status colour in assignee mode.
pub fn colorize(node: &TaskNode, mode: ColorMode, scheme: &ColorScheme) -> ColorKey {
    match mode {
        ColorMode::Assignee => match node.assignee_id {
            Some(assignee) => scheme.palette_color(assignee),
            None => scheme.status_color(node.status),
        },
        ColorMode::Status => scheme.status_color(node.status),
        ColorMode::Project => scheme.palette_color(node.project_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskId;
    use pretty_assertions::assert_eq;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_color("#90caf9"), Some(ColorKey(0x90, 0xCA, 0xF9)));
        assert_eq!(parse_hex_color("90caf9"), None);
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
        assert_eq!(ColorKey(0x90, 0xCA, 0xF9).to_string(), "#90CAF9");
    }

    #[test]
    fn modes() {
        let scheme = ColorScheme::default();
        let mut node = TaskNode::new(TaskId(1), 3, "t");
        node.status = TaskStatus::Done;

        assert_eq!(colorize(&node, ColorMode::Status, &scheme).to_string(), "#C8E6C9");
        // Unassigned falls back to status
        assert_eq!(colorize(&node, ColorMode::Assignee, &scheme).to_string(), "#C8E6C9");
        node.assignee_id = Some(11);
        assert_eq!(
            colorize(&node, ColorMode::Assignee, &scheme),
            scheme.palette_color(1)
        );
        assert_eq!(colorize(&node, ColorMode::Project, &scheme), scheme.palette_color(3));
    }

    #[test]
    fn config_overrides() {
        let mut ui = UiConfig::default();
        ui.palette = vec!["#010203".into(), "bogus".into()];
        ui.status_colors.insert("review".into(), "#0A0B0C".into());
        ui.status_colors.insert("nope".into(), "#0A0B0C".into());
        let scheme = ColorScheme::from_config(&ui);
        assert_eq!(scheme.palette_color(7), ColorKey(1, 2, 3));
        assert_eq!(scheme.status_color(TaskStatus::Review), ColorKey(10, 11, 12));
        assert_eq!(scheme.status_color(TaskStatus::Todo).to_string(), "#FFF9C4");
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Project".parse::<ColorMode>().unwrap(), ColorMode::Project);
        assert!("tag".parse::<ColorMode>().is_err());
    }
}
