// src/colors.rs
//
// Behavior and tank colors. All colors are RGB; conversion to the codec's
// channel order happens at the media boundary, never here.

use image::Rgb;
use std::collections::HashMap;

use crate::types::DetectionTable;

/// Ten-color categorical palette, cycled when exhausted.
pub const PALETTE: [Rgb<u8>; 10] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
    Rgb([227, 119, 194]),
    Rgb([127, 127, 127]),
    Rgb([188, 189, 34]),
    Rgb([23, 190, 207]),
];

/// Fallback for labels missing from the map (boxes and labels).
pub const UNKNOWN_BEHAVIOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fallback for timeline segments whose label is missing from the map.
pub const UNKNOWN_SEGMENT: Rgb<u8> = Rgb([100, 100, 100]);

/// Label → color, assigned in first-seen order.
///
/// Once a label has a color it keeps it for the lifetime of the map, even if
/// later labels wrap the palette.
#[derive(Debug, Clone, Default)]
pub struct BehaviorColorMap {
    colors: HashMap<String, Rgb<u8>>,
}

impl BehaviorColorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign colors by scanning frames in ascending order.
    pub fn from_table(table: &DetectionTable) -> Self {
        let mut map = Self::new();
        for det in table.iter() {
            map.color_for(&det.class_name);
        }
        map
    }

    /// Existing color, or the next palette entry for a new label.
    pub fn color_for(&mut self, label: &str) -> Rgb<u8> {
        if let Some(color) = self.colors.get(label) {
            return *color;
        }
        let color = PALETTE[self.colors.len() % PALETTE.len()];
        self.colors.insert(label.to_string(), color);
        color
    }

    pub fn get(&self, label: &str) -> Option<Rgb<u8>> {
        self.colors.get(label).copied()
    }

    /// Entries sorted by label, the order the legend uses.
    pub fn sorted(&self) -> Vec<(&str, Rgb<u8>)> {
        let mut entries: Vec<(&str, Rgb<u8>)> =
            self.colors.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Deterministic color for a tank's trajectory.
pub fn tank_color(tank_number: u32) -> Rgb<u8> {
    PALETTE[(tank_number.saturating_sub(1) as usize) % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;

    #[test]
    fn test_first_seen_order() {
        let mut map = BehaviorColorMap::new();
        assert_eq!(map.color_for("swim"), PALETTE[0]);
        assert_eq!(map.color_for("rest"), PALETTE[1]);
        assert_eq!(map.color_for("swim"), PALETTE[0]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_palette_cycles_without_reassigning() {
        let mut map = BehaviorColorMap::new();
        for i in 0..10 {
            map.color_for(&format!("b{i}"));
        }
        assert_eq!(map.color_for("b10"), PALETTE[0]);
        assert_eq!(map.get("b3"), Some(PALETTE[3]));
    }

    #[test]
    fn test_from_table_uses_frame_order() {
        let mut table = DetectionTable::default();
        table.push(Detection::new(9, [0.0; 4], "rest"));
        table.push(Detection::new(2, [0.0; 4], "swim"));
        let map = BehaviorColorMap::from_table(&table);
        assert_eq!(map.get("swim"), Some(PALETTE[0]));
        assert_eq!(map.get("rest"), Some(PALETTE[1]));
        let labels: Vec<&str> = map.sorted().iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["rest", "swim"]);
    }

    #[test]
    fn test_tank_color_is_stable() {
        assert_eq!(tank_color(1), PALETTE[0]);
        assert_eq!(tank_color(11), PALETTE[0]);
        assert_eq!(tank_color(4), tank_color(4));
    }
}
