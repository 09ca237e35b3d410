use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::player::PlaybackState;
use crate::{
    error::PlaybackError,
    sources::{AudioQuality, TrackMetadata},
};

/// One entry in a guild's queue.
///
/// Fixed once enqueued, except that the stream URL and the metadata that
/// comes with it are filled in the first time the track is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    /// URL or search text used to resolve the track
    pub locator: String,
    pub title: String,
    pub duration: Option<Duration>,
    pub quality: AudioQuality,
    pub requested_by: UserId,
    /// Direct audio URL, populated lazily
    pub resolved: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(locator: impl Into<String>, requested_by: UserId) -> Self {
        let locator = locator.into();
        Self {
            title: locator.clone(),
            locator,
            duration: None,
            quality: AudioQuality::default(),
            requested_by,
            resolved: None,
            added_at: Utc::now(),
        }
    }

    pub fn from_metadata(meta: TrackMetadata, requested_by: UserId) -> Self {
        let locator = meta
            .webpage_url
            .clone()
            .unwrap_or_else(|| meta.title.clone());
        Self {
            locator,
            title: meta.title,
            duration: meta.duration,
            quality: meta.quality,
            requested_by,
            resolved: meta.audio_url,
            added_at: Utc::now(),
        }
    }

    /// Copies resolution results onto the request, keeping its locator.
    pub fn apply_metadata(&mut self, meta: TrackMetadata) {
        self.title = meta.title;
        self.duration = meta.duration.or(self.duration);
        if !meta.quality.is_empty() {
            self.quality = meta.quality;
        }
        self.resolved = meta.audio_url;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the finished track unless it was skipped
    Track,
    /// Send the finished track to the back of the queue
    Queue,
}

impl LoopMode {
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::Track,
            Self::Track => Self::Queue,
            Self::Queue => Self::Off,
        }
    }
}

/// Pending tracks in play order plus the single now-playing slot.
#[derive(Debug)]
pub struct GuildQueue {
    pending: VecDeque<TrackRequest>,
    current: Option<TrackRequest>,
    loop_mode: LoopMode,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::Off,
            max_size,
        }
    }

    /// Appends tracks, truncated to the free capacity.
    ///
    /// Returns how many were added and the 1-based pending position of the
    /// first one. Fails when nothing fits.
    pub fn extend(
        &mut self,
        tracks: Vec<TrackRequest>,
    ) -> Result<(usize, usize), PlaybackError> {
        let free = self.max_size.saturating_sub(self.pending.len());
        if free == 0 && !tracks.is_empty() {
            return Err(PlaybackError::QueueFull(self.max_size));
        }

        let position = self.pending.len() + 1;
        let added = tracks.len().min(free);
        self.pending.extend(tracks.into_iter().take(added));

        info!("➕ Added {} track(s) to the queue", added);
        Ok((added, position))
    }

    /// Retires the current track according to the loop mode, then pops
    /// the next pending one. The popped track is not current until
    /// [`set_current`](Self::set_current) is called.
    pub fn take_next(&mut self, skipped: bool) -> Option<TrackRequest> {
        if let Some(finished) = self.current.take() {
            match self.loop_mode {
                LoopMode::Track if !skipped => {
                    debug!("🔂 Repeating track: {}", finished.title);
                    self.pending.push_front(finished);
                }
                LoopMode::Queue => {
                    debug!("🔁 Track re-queued by loop: {}", finished.title);
                    self.pending.push_back(finished);
                }
                _ => {}
            }
        }

        let next = self.pending.pop_front();
        if let Some(ref track) = next {
            debug!("➡️ Next in queue: {}", track.title);
        }
        next
    }

    pub fn set_current(&mut self, track: TrackRequest) {
        self.current = Some(track);
    }

    /// Drops the current track without applying the loop mode.
    pub fn clear_current(&mut self) -> Option<TrackRequest> {
        self.current.take()
    }

    /// Puts a track back at the head of the queue.
    pub fn requeue_front(&mut self, track: TrackRequest) {
        self.pending.push_front(track);
    }

    /// Empties the pending queue; the current track is untouched.
    pub fn clear(&mut self) -> usize {
        let removed = self.pending.len();
        self.pending.clear();
        info!("🗑️ Queue cleared ({} tracks)", removed);
        removed
    }

    /// Fisher-Yates shuffle of the pending tracks. Returns false when
    /// there is nothing to reorder.
    pub fn shuffle(&mut self) -> bool {
        if self.pending.len() < 2 {
            return false;
        }

        let mut rng = rand::thread_rng();
        self.pending.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled");
        true
    }

    /// Removes the pending track at a 1-based position.
    pub fn remove(&mut self, position: usize) -> Option<TrackRequest> {
        let removed = position
            .checked_sub(1)
            .and_then(|index| self.pending.remove(index));
        if let Some(ref track) = removed {
            debug!("❌ Removed track at position {}: {}", position, track.title);
        }
        removed
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn current(&self) -> Option<&TrackRequest> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The next few pending tracks, for "up next" displays
    pub fn upcoming(&self, count: usize) -> Vec<TrackRequest> {
        self.pending.iter().take(count).cloned().collect()
    }

    pub fn snapshot(&self, state: PlaybackState) -> QueueSnapshot {
        QueueSnapshot {
            state,
            current: self.current.clone(),
            items: self.pending.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            total_duration: self.total_duration(),
        }
    }

    fn total_duration(&self) -> Duration {
        let queue_duration: Duration = self.pending.iter().filter_map(|t| t.duration).sum();
        let current_duration = self
            .current
            .as_ref()
            .and_then(|c| c.duration)
            .unwrap_or_default();

        queue_duration + current_duration
    }
}

/// Point-in-time copy of a guild's queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub current: Option<TrackRequest>,
    pub items: Vec<TrackRequest>,
    pub loop_mode: LoopMode,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let per_page = items_per_page.max(1);
        let total_pages = self.items.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(self.items.len());

        QueuePage {
            items: self.items.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            first_position: start + 1,
            current_page,
            total_pages,
            total_items: self.items.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<TrackRequest>,
    /// 1-based queue position of `items[0]`
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn req(name: &str) -> TrackRequest {
        let mut track = TrackRequest::new(name, UserId::new(7));
        track.duration = Some(Duration::from_secs(60));
        track
    }

    fn titles(queue: &GuildQueue) -> Vec<String> {
        queue
            .snapshot(PlaybackState::Idle)
            .items
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    fn play_next(queue: &mut GuildQueue, skipped: bool) -> Option<String> {
        let next = queue.take_next(skipped)?;
        let title = next.title.clone();
        queue.set_current(next);
        Some(title)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b")]).unwrap();
        queue.extend(vec![req("c")]).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| play_next(&mut queue, false)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        // the final call retired "c" and found nothing pending
        assert!(queue.current().is_none());
        assert_eq!(queue.take_next(false), None);
    }

    #[test]
    fn test_extend_truncates_to_capacity() {
        let mut queue = GuildQueue::new(3);
        assert_eq!(queue.extend(vec![req("a"), req("b")]).unwrap(), (2, 1));
        assert_eq!(queue.extend(vec![req("c"), req("d")]).unwrap(), (1, 3));
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
        assert!(matches!(
            queue.extend(vec![req("e")]),
            Err(PlaybackError::QueueFull(3))
        ));
    }

    #[test]
    fn test_loop_track_repeats_unless_skipped() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b")]).unwrap();
        queue.set_loop_mode(LoopMode::Track);

        assert_eq!(play_next(&mut queue, false).as_deref(), Some("a"));
        assert_eq!(play_next(&mut queue, false).as_deref(), Some("a"));
        assert_eq!(play_next(&mut queue, true).as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_loop_queue_rotates() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b")]).unwrap();
        queue.set_loop_mode(LoopMode::Queue);

        let order: Vec<_> = (0..5).filter_map(|_| play_next(&mut queue, false)).collect();
        assert_eq!(order, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn test_clear_keeps_current() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b"), req("c")]).unwrap();
        play_next(&mut queue, false);

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b")]).unwrap();
        let a = queue.take_next(false).unwrap();
        queue.requeue_front(a);
        assert_eq!(titles(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_is_one_based() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b"), req("c")]).unwrap();

        assert_eq!(queue.remove(2).map(|t| t.title), Some("b".to_string()));
        assert_eq!(queue.remove(0), None);
        assert_eq!(queue.remove(5), None);
        assert_eq!(titles(&queue), vec!["a", "c"]);
    }

    #[test]
    fn test_shuffle_keeps_tracks() {
        let mut queue = GuildQueue::new(100);
        assert!(!queue.shuffle());

        let names: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        queue
            .extend(names.iter().map(|n| req(n)).collect())
            .unwrap();
        assert!(queue.shuffle());

        let mut after = titles(&queue);
        after.sort();
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(after, expected);
    }

    #[test]
    fn test_snapshot_total_duration() {
        let mut queue = GuildQueue::new(10);
        queue.extend(vec![req("a"), req("b"), req("c")]).unwrap();
        play_next(&mut queue, false);

        let snapshot = queue.snapshot(PlaybackState::Playing);
        assert_eq!(snapshot.total_duration, Duration::from_secs(180));
        assert_eq!(snapshot.items.len(), 2);
    }

    #[test]
    fn test_paging() {
        let mut queue = GuildQueue::new(100);
        queue
            .extend((1..=25).map(|i| req(&i.to_string())).collect())
            .unwrap();
        let snapshot = queue.snapshot(PlaybackState::Playing);

        let page = snapshot.get_page(3, 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.first_position, 21);

        // out of range pages clamp
        assert_eq!(snapshot.get_page(0, 10).current_page, 1);
        assert_eq!(snapshot.get_page(9, 10).current_page, 3);

        let empty = GuildQueue::new(10).snapshot(PlaybackState::Idle);
        let page = empty.get_page(1, 10);
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_apply_metadata_keeps_locator() {
        let mut track = TrackRequest::new("lofi beats", UserId::new(1));
        track.apply_metadata(TrackMetadata {
            title: "Lofi Beats Mix".into(),
            audio_url: Some("https://cdn/lofi".into()),
            webpage_url: Some("https://yt/lofi".into()),
            duration: Some(Duration::from_secs(3600)),
            quality: AudioQuality::default(),
        });

        assert_eq!(track.locator, "lofi beats");
        assert_eq!(track.title, "Lofi Beats Mix");
        assert_eq!(track.resolved.as_deref(), Some("https://cdn/lofi"));
    }

    #[test]
    fn test_loop_mode_cycle() {
        assert_eq!(LoopMode::Off.cycle(), LoopMode::Track);
        assert_eq!(LoopMode::Track.cycle(), LoopMode::Queue);
        assert_eq!(LoopMode::Queue.cycle(), LoopMode::Off);
    }
}
