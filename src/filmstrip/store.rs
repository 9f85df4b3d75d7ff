//! Cache of decoded thumbnails keyed by rounded timestamp. No eviction:
//! the set of keys is bounded by segment math (only segments within one
//! backlog of the viewport are ever requested), so the store grows with
//! the number of distinct seconds actually shown, not with wall time.

use std::collections::HashMap;

use image::RgbaImage;

use super::ThumbKey;

#[derive(Default)]
pub struct ThumbStore {
    map: HashMap<ThumbKey, RgbaImage>,
}

impl ThumbStore {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn get(&self, key: ThumbKey) -> Option<&RgbaImage> {
        self.map.get(&key)
    }

    pub fn contains(&self, key: ThumbKey) -> bool {
        self.map.contains_key(&key)
    }

    /// Insert or overwrite
    pub fn set(&mut self, key: ThumbKey, image: RgbaImage) {
        self.map.insert(key, image);
    }

    /// Drop every cached thumbnail except the fallback tile, which must
    /// survive source changes to avoid a blank flash.
    pub fn clear_except_fallback(&mut self) {
        self.map.retain(|key, _| *key == ThumbKey::Fallback);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
