//! Activity session aggregation.
//!
//! The aggregator is a reducer: it folds feed events and fired timers into a
//! map of per-agent processing sessions and returns timer effects for the
//! runtime to execute. It never sleeps or spawns on its own, which keeps every
//! lifecycle rule unit-testable without a socket.
//!
//! Session lifecycle per agent: `active → ending → removed`. A session never
//! returns to active; a new `start` replaces it with a fresh session instead.
//! Timers are stamped with the session's epoch so a firing armed for a
//! replaced session is ignored.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_types::{
    ActivitySnapshot, AgentId, ConnectionState, FeedEvent, KbUse, ProcessingStatus, SkillUse,
};

/// Timer classes armed per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Force-clear ceiling armed at `start`, in case `end` never arrives.
    Safety,
    /// Holds the glow until the minimum visible duration has elapsed.
    GlowHold,
    /// Removes the session once the fade window has passed.
    Fade,
}

/// A previously armed timer has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub agent_id: AgentId,
    pub kind: TimerKind,
    pub epoch: u64,
}

/// Inputs folded by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Feed(FeedEvent),
    Timer(TimerFired),
}

/// Timer commands for the runtime. Arming a (agent, kind) pair replaces any
/// previous timer for that pair; disarming one that is not armed is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Arm {
        agent_id: AgentId,
        kind: TimerKind,
        epoch: u64,
        after: Duration,
    },
    Disarm {
        agent_id: AgentId,
        kind: TimerKind,
    },
}

/// Timing knobs the reducer needs.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub min_glow: Duration,
    pub fade: Duration,
    pub safety_timeout: Duration,
}

impl From<&crate::config::TimingConfig> for Timing {
    fn from(config: &crate::config::TimingConfig) -> Self {
        Self {
            min_glow: config.min_glow(),
            fade: config.fade(),
            safety_timeout: config.safety_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOrigin {
    /// Created by an `agent_processing start` event.
    Start,
    /// Synthesized for a usage event that arrived with no matching start.
    Orphan,
}

/// One agent's in-flight work, from `start` to final fade-out.
#[derive(Debug, Clone)]
struct ProcessingSession {
    epoch: u64,
    origin: SessionOrigin,
    channel: Option<String>,
    started_at: Instant,
    skill_used: Option<SkillUse>,
    kb_used: Option<KbUse>,
    is_ending: bool,
}

enum UsageEvent {
    Skill(SkillUse),
    Kb(KbUse),
}

/// Reducer over the session map. Single source of truth for all derived
/// activity views.
#[derive(Debug)]
pub struct Aggregator {
    timing: Timing,
    sessions: HashMap<AgentId, ProcessingSession>,
    next_epoch: u64,
}

impl Aggregator {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            sessions: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// Folds one input into the session map and returns timer effects.
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Feed(event) => self.apply_event(event),
            Input::Timer(fired) => self.apply_timer(fired),
        }
    }

    /// Drops every session. The caller is responsible for disarming timers;
    /// a stale firing is harmless either way since no epoch will match.
    pub fn reset(&mut self) {
        self.sessions.clear();
    }

    /// Derives the full view model from the session map.
    pub fn snapshot(&self, connection: ConnectionState, tenant: Option<&str>) -> ActivitySnapshot {
        let mut snapshot = ActivitySnapshot::empty(connection);
        snapshot.tenant = tenant.map(str::to_string);

        for (&agent_id, session) in &self.sessions {
            if session.is_ending {
                snapshot.ending_agents.insert(agent_id);
                if let Some(channel) = &session.channel {
                    snapshot.ending_channels.insert(channel.clone());
                }
            } else {
                if session.origin == SessionOrigin::Start {
                    snapshot.processing.insert(agent_id);
                }
                if let Some(channel) = &session.channel {
                    snapshot.active_channels.insert(channel.clone());
                }
            }
            if let Some(skill) = &session.skill_used {
                snapshot.recent_skill_use.insert(agent_id, skill.clone());
            }
            if let Some(kb) = session.kb_used {
                snapshot.recent_kb_use.insert(agent_id, kb);
            }
        }

        // A channel kept active by another session is not fading.
        let active = snapshot.active_channels.clone();
        snapshot.ending_channels.retain(|channel| !active.contains(channel));

        snapshot
    }

    fn apply_event(&mut self, event: FeedEvent) -> Vec<Effect> {
        match event {
            FeedEvent::AgentProcessing {
                agent_id,
                status: ProcessingStatus::Start,
                channel,
                ..
            } => self.start_session(agent_id, channel),
            FeedEvent::AgentProcessing {
                agent_id,
                status: ProcessingStatus::End,
                ..
            } => self.end_session(agent_id),
            FeedEvent::SkillUsed {
                agent_id,
                skill_type,
                skill_name,
            } => self.attach_usage(
                agent_id,
                UsageEvent::Skill(SkillUse {
                    skill_type,
                    skill_name,
                    at: Utc::now(),
                }),
            ),
            FeedEvent::KbUsed {
                agent_id,
                doc_count,
                chunk_count,
            } => self.attach_usage(
                agent_id,
                UsageEvent::Kb(KbUse {
                    doc_count,
                    chunk_count,
                    at: Utc::now(),
                }),
            ),
            // Connection-level frames are the watcher's business.
            FeedEvent::Authenticated { .. }
            | FeedEvent::Error { .. }
            | FeedEvent::Pong
            | FeedEvent::Unknown => Vec::new(),
        }
    }

    fn start_session(&mut self, agent_id: AgentId, channel: Option<String>) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.sessions.remove(&agent_id).is_some() {
            // A new burst replaces whatever was there, including a pending
            // fade, with no stale usage carried over.
            effects.push(Effect::Disarm {
                agent_id,
                kind: TimerKind::GlowHold,
            });
            effects.push(Effect::Disarm {
                agent_id,
                kind: TimerKind::Fade,
            });
        }

        let epoch = self.bump_epoch();
        self.sessions.insert(
            agent_id,
            ProcessingSession {
                epoch,
                origin: SessionOrigin::Start,
                channel,
                started_at: Instant::now(),
                skill_used: None,
                kb_used: None,
                is_ending: false,
            },
        );
        effects.push(Effect::Arm {
            agent_id,
            kind: TimerKind::Safety,
            epoch,
            after: self.timing.safety_timeout,
        });
        effects
    }

    fn end_session(&mut self, agent_id: AgentId) -> Vec<Effect> {
        let Some(session) = self.sessions.get(&agent_id) else {
            debug!(agent_id, "end event with no live session");
            return Vec::new();
        };
        if session.is_ending {
            debug!(agent_id, "end event for a session already fading");
            return Vec::new();
        }

        let epoch = session.epoch;
        let elapsed = session.started_at.elapsed();
        let mut effects = vec![Effect::Disarm {
            agent_id,
            kind: TimerKind::Safety,
        }];
        match self.timing.min_glow.checked_sub(elapsed) {
            Some(hold) if !hold.is_zero() => {
                // Too fast to have been seen; hold the glow before fading.
                effects.push(Effect::Arm {
                    agent_id,
                    kind: TimerKind::GlowHold,
                    epoch,
                    after: hold,
                });
            }
            _ => effects.extend(self.begin_fade(agent_id)),
        }
        effects
    }

    /// Moves a session into its coordinated fade-out: out of the processing
    /// set immediately, every tied element (channel, skill, KB) fading in
    /// unison, removal after the fade window.
    fn begin_fade(&mut self, agent_id: AgentId) -> Vec<Effect> {
        let Some(session) = self.sessions.get_mut(&agent_id) else {
            return Vec::new();
        };
        session.is_ending = true;
        vec![Effect::Arm {
            agent_id,
            kind: TimerKind::Fade,
            epoch: session.epoch,
            after: self.timing.fade,
        }]
    }

    fn attach_usage(&mut self, agent_id: AgentId, usage: UsageEvent) -> Vec<Effect> {
        if let Some(session) = self.sessions.get_mut(&agent_id)
            && !session.is_ending
        {
            match usage {
                UsageEvent::Skill(skill) => session.skill_used = Some(skill),
                UsageEvent::Kb(kb) => session.kb_used = Some(kb),
            }
            return Vec::new();
        }

        // Usage with no live session (out of order relative to its start, or
        // the session is already fading): synthesize an orphan session with a
        // bounded lifetime of its own so the data is neither dropped nor
        // left to linger.
        let mut effects = Vec::new();
        if self.sessions.remove(&agent_id).is_some() {
            effects.push(Effect::Disarm {
                agent_id,
                kind: TimerKind::Fade,
            });
        }
        let epoch = self.bump_epoch();
        let (skill_used, kb_used) = match usage {
            UsageEvent::Skill(skill) => (Some(skill), None),
            UsageEvent::Kb(kb) => (None, Some(kb)),
        };
        self.sessions.insert(
            agent_id,
            ProcessingSession {
                epoch,
                origin: SessionOrigin::Orphan,
                channel: None,
                started_at: Instant::now(),
                skill_used,
                kb_used,
                is_ending: false,
            },
        );
        effects.push(Effect::Arm {
            agent_id,
            kind: TimerKind::GlowHold,
            epoch,
            after: self.timing.min_glow,
        });
        effects
    }

    fn apply_timer(&mut self, fired: TimerFired) -> Vec<Effect> {
        let TimerFired {
            agent_id,
            kind,
            epoch,
        } = fired;
        let Some(session) = self.sessions.get(&agent_id) else {
            debug!(agent_id, ?kind, "timer fired for a removed session");
            return Vec::new();
        };
        if session.epoch != epoch {
            debug!(agent_id, ?kind, "stale timer for a replaced session");
            return Vec::new();
        }

        match kind {
            TimerKind::Safety if !session.is_ending => {
                warn!(agent_id, "no end event within the safety ceiling, forcing fade");
                self.begin_fade(agent_id)
            }
            TimerKind::GlowHold if !session.is_ending => self.begin_fade(agent_id),
            TimerKind::Fade if session.is_ending => {
                self.sessions.remove(&agent_id);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;
    use vigil_types::FeedEvent;

    use super::*;

    const MIN_GLOW: Duration = Duration::from_millis(5_000);
    const FADE: Duration = Duration::from_millis(3_000);
    const SAFETY: Duration = Duration::from_millis(120_000);

    fn aggregator() -> Aggregator {
        Aggregator::new(Timing {
            min_glow: MIN_GLOW,
            fade: FADE,
            safety_timeout: SAFETY,
        })
    }

    fn start(agent_id: AgentId, channel: Option<&str>) -> Input {
        Input::Feed(FeedEvent::AgentProcessing {
            agent_id,
            status: ProcessingStatus::Start,
            channel: channel.map(str::to_string),
            sender_name: None,
        })
    }

    fn end(agent_id: AgentId) -> Input {
        Input::Feed(FeedEvent::AgentProcessing {
            agent_id,
            status: ProcessingStatus::End,
            channel: None,
            sender_name: None,
        })
    }

    fn skill(agent_id: AgentId) -> Input {
        Input::Feed(FeedEvent::SkillUsed {
            agent_id,
            skill_type: "web_search".to_string(),
            skill_name: "Search".to_string(),
        })
    }

    fn kb(agent_id: AgentId) -> Input {
        Input::Feed(FeedEvent::KbUsed {
            agent_id,
            doc_count: 2,
            chunk_count: 9,
        })
    }

    fn snapshot(aggregator: &Aggregator) -> ActivitySnapshot {
        aggregator.snapshot(ConnectionState::Connected, None)
    }

    /// Extracts the single armed timer of the given kind from the effects.
    fn armed(effects: &[Effect], wanted: TimerKind) -> (u64, Duration) {
        let arms: Vec<_> = effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Arm {
                    kind, epoch, after, ..
                } if *kind == wanted => Some((*epoch, *after)),
                _ => None,
            })
            .collect();
        assert_eq!(arms.len(), 1, "expected exactly one {wanted:?} arm in {effects:?}");
        arms[0]
    }

    fn has_disarm(effects: &[Effect], wanted: TimerKind) -> bool {
        effects
            .iter()
            .any(|effect| matches!(effect, Effect::Disarm { kind, .. } if *kind == wanted))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_arms_safety_timeout() {
        let mut agg = aggregator();
        let effects = agg.apply(start(1, Some("whatsapp")));
        let (_, after) = armed(&effects, TimerKind::Safety);
        assert_eq!(after, SAFETY);

        let view = snapshot(&agg);
        assert!(view.processing.contains(&1));
        assert!(view.active_channels.contains("whatsapp"));
        assert!(view.ending_agents.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_holds_minimum_glow() {
        let mut agg = aggregator();
        agg.apply(start(1, None));

        time::advance(Duration::from_millis(300)).await;
        let effects = agg.apply(end(1));

        assert!(has_disarm(&effects, TimerKind::Safety));
        let (epoch, hold) = armed(&effects, TimerKind::GlowHold);
        assert_eq!(hold, MIN_GLOW - Duration::from_millis(300));
        // Still glowing until the hold fires.
        assert!(snapshot(&agg).processing.contains(&1));

        let effects = agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::GlowHold,
            epoch,
        }));
        let (_, fade) = armed(&effects, TimerKind::Fade);
        assert_eq!(fade, FADE);

        let view = snapshot(&agg);
        assert!(!view.processing.contains(&1));
        assert!(view.ending_agents.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_fades_immediately() {
        let mut agg = aggregator();
        agg.apply(start(1, None));

        time::advance(MIN_GLOW + Duration::from_secs(2)).await;
        let effects = agg.apply(end(1));

        assert!(has_disarm(&effects, TimerKind::Safety));
        armed(&effects, TimerKind::Fade);
        let view = snapshot(&agg);
        assert!(!view.processing.contains(&1));
        assert!(view.ending_agents.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_timer_removes_session() {
        let mut agg = aggregator();
        agg.apply(start(1, Some("telegram")));
        time::advance(MIN_GLOW).await;
        let effects = agg.apply(end(1));
        let (epoch, _) = armed(&effects, TimerKind::Fade);

        agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Fade,
            epoch,
        }));
        assert!(snapshot(&agg).is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_fade_discards_stale_usage() {
        let mut agg = aggregator();
        agg.apply(start(1, Some("whatsapp")));
        agg.apply(skill(1));
        agg.apply(kb(1));
        time::advance(MIN_GLOW).await;
        let effects = agg.apply(end(1));
        let (old_epoch, _) = armed(&effects, TimerKind::Fade);
        assert!(snapshot(&agg).ending_agents.contains(&1));

        // A new burst interrupts the fade with a clean session.
        let effects = agg.apply(start(1, Some("email")));
        assert!(has_disarm(&effects, TimerKind::Fade));
        let view = snapshot(&agg);
        assert!(view.processing.contains(&1));
        assert!(view.ending_agents.is_empty());
        assert!(view.recent_skill_use.is_empty());
        assert!(view.recent_kb_use.is_empty());
        assert!(view.active_channels.contains("email"));
        assert!(!view.active_channels.contains("whatsapp"));

        // The superseded fade timer can no longer touch the new session.
        let effects = agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Fade,
            epoch: old_epoch,
        }));
        assert!(effects.is_empty());
        assert!(snapshot(&agg).processing.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_timeout_force_clears_stuck_session() {
        let mut agg = aggregator();
        let effects = agg.apply(start(1, Some("whatsapp")));
        let (epoch, _) = armed(&effects, TimerKind::Safety);

        time::advance(SAFETY).await;
        let effects = agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Safety,
            epoch,
        }));
        let (fade_epoch, _) = armed(&effects, TimerKind::Fade);

        let view = snapshot(&agg);
        assert!(!view.processing.contains(&1));
        assert!(view.ending_agents.contains(&1));
        assert!(view.ending_channels.contains("whatsapp"));

        agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Fade,
            epoch: fade_epoch,
        }));
        assert!(snapshot(&agg).is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_attaches_and_overwrites() {
        let mut agg = aggregator();
        agg.apply(start(1, None));
        assert!(agg.apply(skill(1)).is_empty());

        let view = snapshot(&agg);
        assert_eq!(view.recent_skill_use[&1].skill_name, "Search");

        agg.apply(Input::Feed(FeedEvent::SkillUsed {
            agent_id: 1,
            skill_type: "calendar".to_string(),
            skill_name: "Schedule".to_string(),
        }));
        let view = snapshot(&agg);
        assert_eq!(view.recent_skill_use[&1].skill_name, "Schedule");

        agg.apply(kb(1));
        let view = snapshot(&agg);
        assert_eq!(view.recent_kb_use[&1].doc_count, 2);
        assert_eq!(view.recent_kb_use[&1].chunk_count, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_usage_fades_on_its_own() {
        let mut agg = aggregator();
        let effects = agg.apply(skill(1));
        let (epoch, hold) = armed(&effects, TimerKind::GlowHold);
        assert_eq!(hold, MIN_GLOW);

        // Visible but never part of the processing set: no start was seen.
        let view = snapshot(&agg);
        assert!(view.processing.is_empty());
        assert!(view.recent_skill_use.contains_key(&1));

        let effects = agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::GlowHold,
            epoch,
        }));
        let (fade_epoch, _) = armed(&effects, TimerKind::Fade);
        assert!(snapshot(&agg).ending_agents.contains(&1));

        agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Fade,
            epoch: fade_epoch,
        }));
        assert!(snapshot(&agg).is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_during_fade_spawns_fresh_orphan() {
        let mut agg = aggregator();
        agg.apply(start(1, None));
        time::advance(MIN_GLOW).await;
        agg.apply(end(1));
        assert!(snapshot(&agg).ending_agents.contains(&1));

        let effects = agg.apply(kb(1));
        assert!(has_disarm(&effects, TimerKind::Fade));
        armed(&effects, TimerKind::GlowHold);

        let view = snapshot(&agg);
        assert!(!view.ending_agents.contains(&1));
        assert!(view.recent_kb_use.contains_key(&1));
        // Orphans still never pulse as "processing".
        assert!(view.processing.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_without_session_is_noop() {
        let mut agg = aggregator();
        assert!(agg.apply(end(9)).is_empty());
        assert!(snapshot(&agg).is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_stays_active_while_any_session_uses_it() {
        let mut agg = aggregator();
        agg.apply(start(1, Some("whatsapp")));
        agg.apply(start(2, Some("whatsapp")));

        time::advance(MIN_GLOW).await;
        agg.apply(end(1));

        let view = snapshot(&agg);
        assert!(view.ending_agents.contains(&1));
        assert!(view.active_channels.contains("whatsapp"));
        // Agent 2 keeps the channel lit, so it is not reported as fading.
        assert!(view.ending_channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything() {
        let mut agg = aggregator();
        agg.apply(start(1, Some("whatsapp")));
        agg.apply(skill(2));
        agg.reset();
        assert!(snapshot(&agg).is_idle());
    }

    /// The end-to-end scenario from the feed contract: start, skill at 100ms,
    /// end at 300ms. The glow must hold until 5s total, then fade for 3s.
    #[tokio::test(start_paused = true)]
    async fn test_fast_burst_scenario() {
        let mut agg = aggregator();
        agg.apply(start(1, Some("whatsapp")));

        time::advance(Duration::from_millis(100)).await;
        agg.apply(skill(1));

        time::advance(Duration::from_millis(200)).await;
        let effects = agg.apply(end(1));
        let (epoch, hold) = armed(&effects, TimerKind::GlowHold);
        assert_eq!(hold, Duration::from_millis(4_700));

        // Glowing with the skill attached the whole way to the 5s mark.
        let view = snapshot(&agg);
        assert!(view.processing.contains(&1));
        assert!(view.recent_skill_use.contains_key(&1));

        time::advance(hold).await;
        let effects = agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::GlowHold,
            epoch,
        }));
        let (fade_epoch, fade) = armed(&effects, TimerKind::Fade);
        assert_eq!(fade, FADE);

        // Fading: out of the processing set, everything else still visible.
        let view = snapshot(&agg);
        assert!(!view.processing.contains(&1));
        assert!(view.ending_agents.contains(&1));
        assert!(view.ending_channels.contains("whatsapp"));
        assert!(view.recent_skill_use.contains_key(&1));

        time::advance(fade).await;
        agg.apply(Input::Timer(TimerFired {
            agent_id: 1,
            kind: TimerKind::Fade,
            epoch: fade_epoch,
        }));
        assert!(snapshot(&agg).is_idle());
    }
}
