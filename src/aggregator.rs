//! Temporal aggregator: converts per-frame detector signals into persistent
//! incidents with debouncing, activation delay, and grouping (spec §4.7).

use std::collections::{HashMap, VecDeque};

use rand::RngCore;

use crate::config::Thresholds;
use crate::detect::{DetectorKind, RepositionSubtype};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncidentKind {
    Blur,
    Shake,
    Glare,
    Reposition,
    Frozen,
    Blackout,
    MajorTamper,
}

impl IncidentKind {
    fn from_detector(detector: DetectorKind) -> Self {
        match detector {
            DetectorKind::Blur => IncidentKind::Blur,
            DetectorKind::Shake => IncidentKind::Shake,
            DetectorKind::Glare => IncidentKind::Glare,
            DetectorKind::Reposition => IncidentKind::Reposition,
            DetectorKind::Liveness => IncidentKind::Frozen,
            DetectorKind::Blackout => IncidentKind::Blackout,
            DetectorKind::MajorTamper => IncidentKind::MajorTamper,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::Blur => "blur",
            IncidentKind::Shake => "shake",
            IncidentKind::Glare => "glare",
            IncidentKind::Reposition => "reposition",
            IncidentKind::Frozen => "frozen",
            IncidentKind::Blackout => "blackout",
            IncidentKind::MajorTamper => "major_tamper",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub subtype: Option<String>,
    pub first_seen_ts: f64,
    pub last_seen_ts: f64,
    pub count: u32,
    pub description: String,
}

fn new_incident_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("inc_{}", hex::encode(bytes))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DetectorState {
    Idle,
    Arming,
    Active,
    Cooling,
}

struct DetectorTrack {
    state: DetectorState,
    consecutive_duration_s: f64,
    arming_started_at: Option<f64>,
    last_active_at: f64,
    active_incident: Option<Incident>,
}

impl DetectorTrack {
    fn new() -> Self {
        Self {
            state: DetectorState::Idle,
            consecutive_duration_s: 0.0,
            arming_started_at: None,
            last_active_at: 0.0,
            active_incident: None,
        }
    }
}

/// Event emitted when an incident opens, updates (count increments via
/// reopening from `cooling`), or closes. Pushed to the event sink.
#[derive(Clone, Debug)]
pub enum IncidentTransition {
    Opened(Incident),
    Updated(Incident),
    Closed(Incident),
}

fn sustain_window(kind: IncidentKind, subtype: Option<RepositionSubtype>, thresholds: &Thresholds) -> f64 {
    match (kind, subtype) {
        (IncidentKind::Blur, _) => thresholds.blur_sustain_secs,
        (IncidentKind::Reposition, Some(RepositionSubtype::Fast)) => thresholds.fast_reposition_sustain_secs,
        (IncidentKind::Reposition, _) => thresholds.blur_sustain_secs,
        (IncidentKind::Glare, _) => thresholds.blur_sustain_secs,
        (IncidentKind::Shake, _) => thresholds.blur_sustain_secs,
        // Liveness/blackout/major_tamper are already gated by the detector's
        // own 10s activation window; once past that, the aggregator applies
        // the same default sustain as other detectors.
        (IncidentKind::Frozen, _) | (IncidentKind::Blackout, _) | (IncidentKind::MajorTamper, _) => {
            thresholds.blur_sustain_secs
        }
    }
}

/// Maintains per-detector state machines and the retained incident set.
pub struct Aggregator {
    tracks: HashMap<DetectorKind, DetectorTrack>,
    retained: VecDeque<Incident>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
            retained: VecDeque::new(),
        }
    }

    pub fn retained_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.retained.iter()
    }

    /// Clears reposition-specific aggregator state (used alongside
    /// `RepositionDetector::reset` for `dismiss_reposition_alert`).
    pub fn dismiss(&mut self, detector: DetectorKind) {
        self.tracks.remove(&detector);
    }

    /// Advances the state machine for one detector signal at `timestamp`.
    /// `subtype` carries reposition's fast/slow distinction; `None` for
    /// every other detector.
    pub fn observe(
        &mut self,
        detector: DetectorKind,
        tripped: bool,
        subtype: Option<RepositionSubtype>,
        timestamp: f64,
        dt: f64,
        thresholds: &Thresholds,
    ) -> Option<IncidentTransition> {
        let kind = IncidentKind::from_detector(detector);
        let track = self.tracks.entry(detector).or_insert_with(DetectorTrack::new);
        let sustain = sustain_window(kind, subtype, thresholds);

        match track.state {
            DetectorState::Idle => {
                if tripped {
                    track.state = DetectorState::Arming;
                    track.consecutive_duration_s = 0.0;
                    track.arming_started_at = Some(timestamp);
                }
                None
            }
            DetectorState::Arming => {
                if !tripped {
                    track.state = DetectorState::Idle;
                    track.consecutive_duration_s = 0.0;
                    track.arming_started_at = None;
                    return None;
                }
                track.consecutive_duration_s += dt;
                if track.consecutive_duration_s >= sustain {
                    track.state = DetectorState::Active;
                    track.last_active_at = timestamp;
                    let incident = Incident {
                        id: new_incident_id(),
                        kind,
                        subtype: subtype.map(|s| match s {
                            RepositionSubtype::Fast => "fast".to_string(),
                            RepositionSubtype::Slow => "slow".to_string(),
                        }),
                        first_seen_ts: track.arming_started_at.unwrap_or(timestamp),
                        last_seen_ts: timestamp,
                        count: 1,
                        description: format!("{} sustained for {:.1}s", kind.as_str(), track.consecutive_duration_s),
                    };
                    track.active_incident = Some(incident.clone());
                    Some(IncidentTransition::Opened(self.retain(incident, thresholds.max_retained_incidents)))
                } else {
                    None
                }
            }
            DetectorState::Active => {
                if tripped {
                    track.last_active_at = timestamp;
                    let snapshot = track.active_incident.as_mut().map(|incident| {
                        incident.last_seen_ts = timestamp;
                        incident.clone()
                    });
                    if let Some(incident) = snapshot {
                        self.update_retained(incident.clone());
                        return Some(IncidentTransition::Updated(incident));
                    }
                    None
                } else {
                    track.state = DetectorState::Cooling;
                    None
                }
            }
            DetectorState::Cooling => {
                let elapsed = timestamp - track.last_active_at;
                if tripped && elapsed <= thresholds.cooling_window_secs {
                    track.state = DetectorState::Active;
                    track.last_active_at = timestamp;
                    let snapshot = track.active_incident.as_mut().map(|incident| {
                        incident.count += 1;
                        incident.last_seen_ts = timestamp;
                        incident.clone()
                    });
                    if let Some(incident) = snapshot {
                        self.update_retained(incident.clone());
                        return Some(IncidentTransition::Updated(incident));
                    }
                    None
                } else if elapsed > thresholds.cooling_window_secs {
                    track.state = DetectorState::Idle;
                    track.consecutive_duration_s = 0.0;
                    track.arming_started_at = None;
                    let closed = track.active_incident.take();
                    if tripped {
                        // Re-trip arrived after the grouping window: start a
                        // fresh arming cycle rather than dropping the signal.
                        track.state = DetectorState::Arming;
                        track.consecutive_duration_s = 0.0;
                        track.arming_started_at = Some(timestamp);
                    }
                    closed.map(|incident| {
                        self.remove_retained(&incident.id);
                        IncidentTransition::Closed(incident)
                    })
                } else {
                    None
                }
            }
        }
    }

    fn retain(&mut self, incident: Incident, cap: usize) -> Incident {
        self.retained.push_back(incident.clone());
        while self.retained.len() > cap {
            self.retained.pop_front();
        }
        incident
    }

    fn update_retained(&mut self, incident: Incident) {
        if let Some(existing) = self.retained.iter_mut().find(|i| i.id == incident.id) {
            *existing = incident;
        }
    }

    fn remove_retained(&mut self, id: &str) {
        self.retained.retain(|i| i.id != id);
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
