use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::song::Song;
use crate::error::PlayerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the song that just ended
    Single,
    /// Re-append finished songs to the tail
    Queue,
}

impl LoopMode {
    pub fn label(self) -> &'static str {
        match self {
            LoopMode::Off => "➡️ Off",
            LoopMode::Single => "🔂 Canción",
            LoopMode::Queue => "🔁 Cola",
        }
    }
}

/// Bounded FIFO of upcoming songs.
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<Song>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una canción al final de la cola
    pub fn push(&mut self, song: Song) -> Result<(), PlayerError> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull { max: self.max_size });
        }

        debug!("➕ Agregado a la cola: {}", song.title);
        self.items.push_back(song);
        Ok(())
    }

    /// Agrega tantas canciones como quepan y devuelve cuántas entraron
    pub fn extend(&mut self, songs: impl IntoIterator<Item = Song>) -> usize {
        let available = self.remaining_capacity();
        let before = self.items.len();
        self.items.extend(songs.into_iter().take(available));
        let added = self.items.len() - before;
        if added > 0 {
            info!("➕ Agregadas {} canciones a la cola", added);
        }
        added
    }

    pub fn pop_front(&mut self) -> Option<Song> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&Song> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining_capacity(&self) -> usize {
        self.max_size.saturating_sub(self.items.len())
    }

    /// Limpia la cola
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.items.iter()
    }

    pub fn snapshot(&self) -> Vec<Song> {
        self.items.iter().cloned().collect()
    }

    /// Seconds of known duration waiting in the queue
    pub fn total_duration(&self) -> u64 {
        self.items.iter().map(|s| s.duration).sum()
    }
}

/// Point-in-time copy of a player's queue for rendering.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Song>,
    pub items: Vec<Song>,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub total_duration: u64,
}

impl QueueSnapshot {
    /// Obtiene una página específica de la cola
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        let per_page = per_page.max(1);
        let total_pages = self.items.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(self.items.len());

        QueuePage {
            items: self.items.get(start..end).map(<[Song]>::to_vec).unwrap_or_default(),
            offset: start,
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Song>,
    /// Index of the first item on this page
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::song::tests::song;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_songs_beyond_the_bound() {
        let mut queue = MusicQueue::new(2);
        queue.push(song("a", "A")).unwrap();
        queue.push(song("b", "B")).unwrap();

        let err = queue.push(song("c", "C")).unwrap_err();
        assert!(matches!(err, PlayerError::QueueFull { max: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn extend_stops_at_capacity() {
        let mut queue = MusicQueue::new(3);
        queue.push(song("a", "A")).unwrap();

        let added = queue.extend(vec![song("b", "B"), song("c", "C"), song("d", "D")]);
        assert_eq!(added, 2);
        assert_eq!(queue.remaining_capacity(), 0);
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = MusicQueue::new(10);
        queue.extend(vec![song("a", "A"), song("b", "B")]);
        assert_eq!(queue.pop_front().map(|s| s.title), Some("A".to_string()));
        assert_eq!(queue.front().map(|s| s.title.as_str()), Some("B"));
    }

    #[test]
    fn shuffle_keeps_every_song() {
        let mut queue = MusicQueue::new(50);
        queue.extend((0..20).map(|i| song(&format!("id{i}"), &format!("S{i}"))));
        queue.shuffle();

        let mut titles: Vec<_> = queue.iter().map(|s| s.title.clone()).collect();
        titles.sort();
        let mut expected: Vec<_> = (0..20).map(|i| format!("S{i}")).collect();
        expected.sort();
        assert_eq!(titles, expected);
    }

    #[test]
    fn pages_are_clamped() {
        let snapshot = QueueSnapshot {
            current: None,
            items: (0..12).map(|i| song(&format!("id{i}"), &format!("S{i}"))).collect(),
            loop_mode: LoopMode::Off,
            autoplay: true,
            total_duration: 0,
        };

        let page = snapshot.page(2, 10);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.offset, 10);
        assert_eq!(page.total_pages, 2);

        assert_eq!(snapshot.page(9, 10).current_page, 2);
    }
}
