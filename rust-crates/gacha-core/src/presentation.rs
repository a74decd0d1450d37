//! Reveal sequencing handed to clients with each pull.
//!
//! Playback never gates the award: a claim may be sent from any phase, and
//! the ledger makes repeated claims harmless.
use crate::{
    outcome::DrawOutcome,
    roster::{
        AssetPaths,
        CHANCE_PATTERNS,
        PRE_SCENE_PATTERNS,
        PRE_SCENE_STEPS,
        REVERSAL_STEPS,
        split_card_id,
    },
    weighted::{
        RollSource,
        pick_uniform,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackPhase {
    Standby,
    Countdown,
    Puchun,
    TitleVideo,
    PreScene,
    ChanceScene,
    MainScene,
    DondenScene,
    CardReveal,
    LossReveal,
}

impl PlaybackPhase {
    pub fn is_reveal(self) -> bool {
        matches!(self, PlaybackPhase::CardReveal | PlaybackPhase::LossReveal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSegment {
    pub phase: PlaybackPhase,
    pub order: u8,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationPlan {
    pub phases: Vec<PlaybackPhase>,
    pub segments: Vec<VideoSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_image: Option<String>,
}

impl PresentationPlan {
    /// Lays out the phases for `outcome`. Pre-scene and chance patterns are
    /// drawn from `rolls`; cards outside the roster get phases but no videos.
    pub fn for_outcome<R>(outcome: &DrawOutcome, assets: &AssetPaths, rolls: &mut R) -> Self
    where
        R: RollSource + ?Sized,
    {
        if outcome.is_loss {
            return Self {
                phases: vec![
                    PlaybackPhase::Standby,
                    PlaybackPhase::Countdown,
                    PlaybackPhase::LossReveal,
                ],
                segments: Vec::new(),
                card_image: Some(assets.loss_card_image()),
            };
        }

        let mut phases = vec![
            PlaybackPhase::Standby,
            PlaybackPhase::Countdown,
            PlaybackPhase::Puchun,
            PlaybackPhase::TitleVideo,
            PlaybackPhase::PreScene,
            PlaybackPhase::ChanceScene,
            PlaybackPhase::MainScene,
        ];
        if outcome.is_reversal {
            phases.push(PlaybackPhase::DondenScene);
        }
        phases.push(PlaybackPhase::CardReveal);

        let Some((character, key)) = split_card_id(&outcome.card_id) else {
            return Self {
                phases,
                segments: Vec::new(),
                card_image: None,
            };
        };
        let profile = character.profile();

        let mut segments = vec![VideoSegment {
            phase: PlaybackPhase::TitleVideo,
            order: 1,
            url: assets.title_video(character, key),
        }];
        let pre = pick_uniform(&PRE_SCENE_PATTERNS, rolls)
            .copied()
            .unwrap_or(PRE_SCENE_PATTERNS[0]);
        segments.extend((1..=PRE_SCENE_STEPS).map(|step| VideoSegment {
            phase: PlaybackPhase::PreScene,
            order: step,
            url: assets.pre_scene_video(character, pre, step),
        }));
        let chance = pick_uniform(&CHANCE_PATTERNS, rolls)
            .copied()
            .unwrap_or(CHANCE_PATTERNS[0]);
        segments.push(VideoSegment {
            phase: PlaybackPhase::ChanceScene,
            order: 1,
            url: assets.chance_video(character, chance),
        });

        // reversal plays the origin's story first, then flips into the destination
        let route = outcome
            .is_reversal
            .then(|| profile.route_into(key))
            .flatten();
        let story_key = route.map(|r| r.from).unwrap_or(key);
        let steps = profile.main_scene_steps(story_key).unwrap_or(1);
        segments.extend((1..=steps).map(|step| VideoSegment {
            phase: PlaybackPhase::MainScene,
            order: step,
            url: assets.main_scene_video(character, story_key, step),
        }));
        if let Some(route) = route {
            segments.extend((1..=REVERSAL_STEPS).map(|step| VideoSegment {
                phase: PlaybackPhase::DondenScene,
                order: step,
                url: assets.reversal_video(character, route.from, route.to, step),
            }));
        }

        Self {
            phases,
            segments,
            card_image: Some(assets.card_image(character, key)),
        }
    }
}

/// Client-side playback cursor. Tells the caller when to send the claim:
/// once on reaching the reveal, or immediately on skip-all.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Clone, Debug)]
pub struct Playback {
    phases: Vec<PlaybackPhase>,
    cursor: usize,
    claim_sent: bool,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Playback {
    pub fn new(plan: &PresentationPlan) -> Self {
        Self {
            phases: plan.phases.clone(),
            cursor: 0,
            claim_sent: false,
        }
    }

    pub fn phase(&self) -> Option<PlaybackPhase> {
        self.phases.get(self.cursor).copied()
    }

    /// Moves to the next phase. Returns `true` when the claim should be sent now.
    pub fn advance(&mut self) -> bool {
        if self.cursor + 1 < self.phases.len() {
            self.cursor += 1;
        }
        self.claim_if_revealed()
    }

    /// Jumps to the reveal. Returns `true` when the claim should be sent now.
    pub fn skip_all(&mut self) -> bool {
        self.cursor = self.phases.len().saturating_sub(1);
        self.take_claim()
    }

    fn claim_if_revealed(&mut self) -> bool {
        match self.phase() {
            Some(phase) if phase.is_reveal() => self.take_claim(),
            _ => false,
        }
    }

    fn take_claim(&mut self) -> bool {
        !std::mem::replace(&mut self.claim_sent, true)
    }
}
