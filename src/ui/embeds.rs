use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        player::PlaybackState,
        queue::{LoopMode, QueueSnapshot, TrackRequest},
    },
    sources::AudioQuality,
};

/// Tracks per `/queue` page
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Bot color palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PINK: Colour = Colour::from_rgb(255, 105, 180);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Meo Music";

pub fn create_now_playing_embed(track: &TrackRequest, upcoming: &[TrackRequest]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎶 Now Playing")
        .description(format!("**{}**", track.title))
        .color(colors::MUSIC_PINK)
        .field("⏱️ Duration", duration_label(track.duration), true)
        .field(
            "🎧 Quality",
            quality_label(&track.quality).unwrap_or_else(|| "Auto".to_string()),
            true,
        )
        .field("👤 Requested by", format!("<@{}>", track.requested_by), true);

    if !upcoming.is_empty() {
        let next = upcoming
            .iter()
            .enumerate()
            .map(|(i, t)| format!("**{}**. {}", i + 1, t.title))
            .collect::<Vec<_>>()
            .join("\n");
        embed = embed.field("⏭️ Up next", next, false);
    }

    if track.locator.starts_with("http") {
        embed = embed.url(&track.locator);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_track_added_embed(track: &TrackRequest, position: usize) -> CreateEmbed {
    let mut details = format!("⏱️ {}", duration_label(track.duration));
    if let Some(quality) = quality_label(&track.quality) {
        details.push_str(&format!(" • 🎧 {}", quality));
    }

    CreateEmbed::default()
        .title("📥 Added to Queue")
        .description(format!("**{}**\n{}", track.title, details))
        .color(colors::SUCCESS_GREEN)
        .field("📍 Position", position.to_string(), true)
        .field("👤 Requested by", format!("<@{}>", track.requested_by), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `dropped` counts entries that did not fit in the queue.
pub fn create_playlist_added_embed(title: &str, added: usize, dropped: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Playlist Added")
        .description(format!(
            "Added **{}** track{} from **{}**",
            added,
            if added == 1 { "" } else { "s" },
            title
        ))
        .color(colors::SUCCESS_GREEN);

    if dropped > 0 {
        embed = embed.field(
            "⚠️ Queue full",
            format!("{} track(s) did not fit and were skipped", dropped),
            false,
        );
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let queue_page = snapshot.get_page(page, QUEUE_PAGE_SIZE);

    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if snapshot.current.is_none() && snapshot.items.is_empty() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.current {
        let status = match snapshot.state {
            PlaybackState::Paused => "⏸️",
            _ => loop_icon(snapshot.loop_mode),
        };
        embed = embed.field(
            format!("{} Now Playing", status),
            format!("**{}** `[{}]`", current.title, duration_label(current.duration)),
            false,
        );
    }

    if !queue_page.items.is_empty() {
        let mut description = String::new();
        for (i, item) in queue_page.items.iter().enumerate() {
            let duration = item
                .duration
                .map(|d| format!(" `[{}]`", format_duration(d)))
                .unwrap_or_default();
            description.push_str(&format!(
                "**{}**. {}{}\n",
                queue_page.first_position + i,
                item.title,
                duration
            ));
        }
        embed = embed.field("Up next", description, false);
    }

    let mut info = format!("**Total:** {} tracks", queue_page.total_items);
    if snapshot.total_duration > Duration::ZERO {
        info.push_str(&format!(
            " • **Duration:** {}",
            format_duration(snapshot.total_duration)
        ));
    }
    if snapshot.loop_mode != LoopMode::Off {
        info.push_str(&format!(" • {} **{}**", loop_icon(snapshot.loop_mode), loop_label(snapshot.loop_mode)));
    }
    embed = embed.field("Info", info, false);

    let footer = if queue_page.total_pages > 1 {
        format!(
            "Page {} of {} • Meo Music",
            queue_page.current_page, queue_page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

pub fn create_track_failed_embed(track: &TrackRequest, error: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("⚠️ Skipped a track")
        .description(format!("**{}**\n{}", track.title, error))
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new("Moving on to the next track"))
}

pub fn create_queue_finished_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("📭 Queue finished")
        .description("Add more with `/play` 🎵")
        .color(colors::NEUTRAL_GRAY)
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn loop_label(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "Loop off",
        LoopMode::Track => "Looping track",
        LoopMode::Queue => "Looping queue",
    }
}

pub fn loop_icon(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "▶️",
        LoopMode::Track => "🔂",
        LoopMode::Queue => "🔁",
    }
}

/// "256kbps • OPUS", falling back to the container when the codec is
/// unknown. `None` when nothing is known.
pub fn quality_label(quality: &AudioQuality) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(kbps) = quality.bitrate_kbps {
        parts.push(format!("{}kbps", kbps as u32));
    }
    if let Some(codec) = &quality.codec {
        parts.push(codec.to_uppercase());
    } else if let Some(ext) = &quality.ext {
        parts.push(ext.to_uppercase());
    }

    (!parts.is_empty()).then(|| parts.join(" • "))
}

fn duration_label(duration: Option<Duration>) -> String {
    duration
        .map(format_duration)
        .unwrap_or_else(|| "🔴 Live".to_string())
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(212)), "3:32");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_quality_label() {
        let quality = AudioQuality {
            bitrate_kbps: Some(160.7),
            codec: Some("opus".into()),
            ext: Some("webm".into()),
        };
        assert_eq!(quality_label(&quality).as_deref(), Some("160kbps • OPUS"));

        let ext_only = AudioQuality {
            ext: Some("m4a".into()),
            ..AudioQuality::default()
        };
        assert_eq!(quality_label(&ext_only).as_deref(), Some("M4A"));

        assert_eq!(quality_label(&AudioQuality::default()), None);
    }
}
