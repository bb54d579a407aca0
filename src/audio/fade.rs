use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sink::TrackControl;

/// Steps used to silence a track when its fade is interrupted
pub const CANCEL_STEPS: u32 = 5;
pub const CANCEL_STEP: Duration = Duration::from_millis(10);

/// Volume after `step` of `steps` of a fade-in, rising fast then settling.
pub fn fade_in_level(target: f32, step: u32, steps: u32) -> f32 {
    let progress = step as f32 / steps.max(1) as f32;
    (target * progress.sqrt()).min(target)
}

/// Volume after `step` of `steps` of a fade-out. Drops slowly at first.
pub fn fade_out_level(start: f32, step: u32, steps: u32) -> f32 {
    let progress = step as f32 / steps.max(1) as f32;
    (start * (1.0 - progress * progress)).max(0.0)
}

/// When the fade-out should begin, measured from the track start. Tracks not
/// longer than two crossfades get no fade-out.
pub fn fade_out_delay(duration_secs: u64, crossfade: Duration) -> Option<Duration> {
    let duration = Duration::from_secs(duration_secs);
    if duration > crossfade * 2 {
        Some(duration - crossfade)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadePlan {
    pub target: f32,
    pub duration: Duration,
    pub steps: u32,
    pub fade_out_at: Option<Duration>,
}

impl FadePlan {
    pub fn new(target: f32, crossfade: Duration, steps: u32, track_secs: u64) -> Self {
        Self {
            target,
            duration: crossfade,
            steps: steps.max(1),
            fade_out_at: fade_out_delay(track_secs, crossfade),
        }
    }

    fn step_duration(&self) -> Duration {
        self.duration / self.steps
    }
}

/// The single fade task attached to a playing track.
#[derive(Debug)]
pub struct FadeHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl FadeHandle {
    pub fn spawn(track: Arc<dyn TrackControl>, plan: FadePlan) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(track, plan, token.clone()));
        Self { token, task }
    }

    /// Signals the fade and lets the silencing ramp finish on its own.
    pub fn cancel(self) {
        self.token.cancel();
    }

    /// Signals the fade and waits until the track is silent.
    pub async fn cancel_and_wait(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            debug!("Fade terminó con error: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sleeps for `duration` and reports whether the token fired first.
async fn interrupted(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

async fn silence(track: &dyn TrackControl, from: f32) {
    for j in 0..CANCEL_STEPS {
        let _ = track.set_volume(from * (1.0 - j as f32 / CANCEL_STEPS as f32));
        sleep(CANCEL_STEP).await;
    }
    let _ = track.set_volume(0.0);
}

async fn run(track: Arc<dyn TrackControl>, plan: FadePlan, token: CancellationToken) {
    let started = Instant::now();
    let step = plan.step_duration();

    debug!("🔊 Iniciando fade in ({:?})", plan.duration);
    let mut level = 0.0;
    for i in 1..=plan.steps {
        level = fade_in_level(plan.target, i, plan.steps);
        if let Err(e) = track.set_volume(level) {
            debug!("Fade in interrumpido: {}", e);
            return;
        }
        if interrupted(&token, step).await {
            silence(track.as_ref(), level).await;
            return;
        }
    }

    let Some(at) = plan.fade_out_at else {
        return;
    };
    if interrupted(&token, at.saturating_sub(started.elapsed())).await {
        return;
    }

    debug!("🔉 Iniciando fade out ({:?})", plan.duration);
    for i in 1..=plan.steps {
        let next = fade_out_level(plan.target, i, plan.steps);
        if let Err(e) = track.set_volume(next) {
            debug!("Fade out interrumpido: {}", e);
            return;
        }
        level = next;
        if interrupted(&token, step).await {
            silence(track.as_ref(), level).await;
            return;
        }
    }
}
