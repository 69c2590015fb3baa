//! Injection cache and trigger engine.
//!
//! Driven once per valid frame by the processing context:
//!
//! 1. Cache: every cache rule matching the frame's id and cycle gets a
//!    verbatim copy of the captured bytes (latest capture wins).
//! 2. Trigger: the first trigger rule for the frame's id whose cycle
//!    predicate matches, whose template is present, and for which a host
//!    override is pending gets its template mutated and armed.
//!
//! Mutation order for an armed template: splice the override into the
//! payload, advance the alive counter, recompute the E2E CRC, set the
//! cycle field to the current cycle, recompute the frame CRC.
//!
//! Submitting overrides and toggling injection happen through the
//! cloneable [`InjectorHandle`]; templates never leave the engine.

use crate::error::CoreError;
use crate::overrides::{HostOverride, OverrideRing, OverrideStats};
use crate::rules::{RuleSet, TriggerRule};
use frbridge_protocol::{
    crc, Direction, Frame, HEADER_SIZE, MAX_FRAME_BYTES, MIN_FRAME_BYTES, OVERRIDE_PREFIX_LEN,
    TRAILER_SIZE,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Alive counter value reserved as "invalid"; the counter wraps before it.
pub const ALIVE_COUNTER_SENTINEL: u8 = 0x0F;

/// Receives templates armed for transmission.
pub trait Transmitter {
    /// Hands `bytes` to the transmit path for `direction`. Fire-and-forget.
    fn arm_transmission(&mut self, direction: Direction, bytes: &[u8]);
}

/// Cached, mutable copy of a captured frame.
#[derive(Clone)]
pub struct FrameTemplate {
    valid: bool,
    length: u16,
    bytes: [u8; MAX_FRAME_BYTES],
}

impl FrameTemplate {
    fn empty() -> Self {
        Self {
            valid: false,
            length: 0,
            bytes: [0; MAX_FRAME_BYTES],
        }
    }

    fn store(&mut self, raw: &[u8]) {
        let len = raw.len().min(MAX_FRAME_BYTES);
        self.bytes[..len].copy_from_slice(&raw[..len]);
        self.length = len as u16;
        self.valid = true;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.length as usize]
    }

    fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(MIN_FRAME_BYTES)
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.length as usize - TRAILER_SIZE;
        &mut self.bytes[HEADER_SIZE..end]
    }

    fn set_cycle(&mut self, cycle: u8) {
        self.bytes[4] = (self.bytes[4] & 0xC0) | (cycle & 0x3F);
    }

    fn reseal(&mut self) {
        let end = self.length as usize - TRAILER_SIZE;
        let crc = crc::frame_crc(&self.bytes[..end]).to_be_bytes();
        self.bytes[end..end + TRAILER_SIZE].copy_from_slice(&crc[1..]);
    }
}

/// Advances a 4-bit alive counter, skipping the reserved sentinel.
pub fn next_alive_counter(counter: u8) -> u8 {
    let next = (counter & 0x0F) + 1;
    if next >= ALIVE_COUNTER_SENTINEL {
        0
    } else {
        next
    }
}

/// Why a matching trigger did not arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTemplate,
    Bounds,
    NoOverride,
    Disabled,
}

/// Result of running one frame through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOutcome {
    /// Number of templates refreshed from this frame.
    pub cached: usize,
    /// Direction of the transmission armed by this frame, if any.
    pub armed: Option<Direction>,
}

/// Engine counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_seen: u64,
    pub cached: u64,
    pub triggers_matched: u64,
    pub injected: u64,
    pub skipped_no_template: u64,
    pub skipped_bounds: u64,
    pub skipped_no_override: u64,
    pub skipped_disabled: u64,
}

#[derive(Default)]
struct EngineCounters {
    frames_seen: AtomicU64,
    cached: AtomicU64,
    triggers_matched: AtomicU64,
    injected: AtomicU64,
    skipped_no_template: AtomicU64,
    skipped_bounds: AtomicU64,
    skipped_no_override: AtomicU64,
    skipped_disabled: AtomicU64,
}

impl EngineCounters {
    fn skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::NoTemplate => &self.skipped_no_template,
            SkipReason::Bounds => &self.skipped_bounds,
            SkipReason::NoOverride => &self.skipped_no_override,
            SkipReason::Disabled => &self.skipped_disabled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            triggers_matched: self.triggers_matched.load(Ordering::Relaxed),
            injected: self.injected.load(Ordering::Relaxed),
            skipped_no_template: self.skipped_no_template.load(Ordering::Relaxed),
            skipped_bounds: self.skipped_bounds.load(Ordering::Relaxed),
            skipped_no_override: self.skipped_no_override.load(Ordering::Relaxed),
            skipped_disabled: self.skipped_disabled.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    rules: RuleSet,
    overrides: OverrideRing,
    enabled: AtomicBool,
    counters: EngineCounters,
}

struct ResolvedTrigger {
    rule: TriggerRule,
    slot: usize,
}

/// Owns the templates; runs on the processing context.
pub struct TriggerEngine {
    templates: Box<[FrameTemplate]>,
    triggers: Box<[ResolvedTrigger]>,
    shared: Arc<Shared>,
}

impl TriggerEngine {
    /// Builds the engine and its control handle from a validated rule set.
    pub fn new(
        rules: RuleSet,
        override_capacity: usize,
        enabled: bool,
    ) -> Result<(Self, InjectorHandle), CoreError> {
        rules.validate()?;

        let mut triggers = Vec::with_capacity(rules.trigger_rules.len());
        for (index, rule) in rules.trigger_rules.iter().enumerate() {
            let slot = rules
                .template_slot(rule)
                .ok_or_else(|| CoreError::InvalidRule {
                    kind: "trigger",
                    index,
                    reason: "no template slot".to_string(),
                })?;
            triggers.push(ResolvedTrigger { rule: *rule, slot });
        }

        let templates = vec![FrameTemplate::empty(); rules.cache_rules.len()];
        let shared = Arc::new(Shared {
            rules,
            overrides: OverrideRing::new(override_capacity)?,
            enabled: AtomicBool::new(enabled),
            counters: EngineCounters::default(),
        });

        let engine = Self {
            templates: templates.into_boxed_slice(),
            triggers: triggers.into_boxed_slice(),
            shared: shared.clone(),
        };
        Ok((engine, InjectorHandle { shared }))
    }

    /// Runs the cache and trigger steps for one valid frame.
    ///
    /// `raw` is the frame as captured; its first `frame.wire_len()` bytes
    /// become the template.
    pub fn process<T: Transmitter + ?Sized>(
        &mut self,
        frame: &Frame,
        raw: &[u8],
        tx: &mut T,
    ) -> EngineOutcome {
        let counters = &self.shared.counters;
        counters.frames_seen.fetch_add(1, Ordering::Relaxed);

        let mut outcome = EngineOutcome::default();
        if let Some(captured) = raw.get(..frame.wire_len()) {
            let cache_rules = self.shared.rules.cache_rules.iter();
            for (rule, template) in cache_rules.zip(self.templates.iter_mut()) {
                if rule.matches(frame.frame_id, frame.cycle_count) {
                    template.store(captured);
                    outcome.cached += 1;
                }
            }
        }
        counters
            .cached
            .fetch_add(outcome.cached as u64, Ordering::Relaxed);

        let enabled = self.shared.enabled.load(Ordering::Acquire);
        for trigger in self.triggers.iter() {
            let rule = &trigger.rule;
            if rule.trigger_id != frame.frame_id || !rule.matches_cycle(frame.cycle_count) {
                continue;
            }
            counters.triggers_matched.fetch_add(1, Ordering::Relaxed);

            if !enabled {
                counters.skip(SkipReason::Disabled);
                continue;
            }

            let template = &mut self.templates[trigger.slot];
            match inject(template, rule, &self.shared.overrides, frame.cycle_count) {
                Ok(()) => {
                    tx.arm_transmission(rule.direction, template.bytes());
                    counters.injected.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        "Armed {:#x} on {} (trigger {:#x}, cycle {})",
                        rule.target_id,
                        rule.direction.as_str(),
                        rule.trigger_id,
                        frame.cycle_count
                    );
                    outcome.armed = Some(rule.direction);
                    break;
                }
                Err(reason) => {
                    counters.skip(reason);
                    tracing::trace!(
                        "Trigger {:#x} -> {:#x} skipped: {:?}",
                        rule.trigger_id,
                        rule.target_id,
                        reason
                    );
                }
            }
        }
        outcome
    }

    /// Current template for a cache rule, by rule index.
    pub fn template(&self, slot: usize) -> Option<&FrameTemplate> {
        self.templates.get(slot)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }
}

fn inject(
    template: &mut FrameTemplate,
    rule: &TriggerRule,
    overrides: &OverrideRing,
    cycle: u8,
) -> Result<(), SkipReason> {
    if !template.valid || (template.length as usize) < MIN_FRAME_BYTES {
        return Err(SkipReason::NoTemplate);
    }
    if template.payload_len() < rule.min_payload_len() {
        return Err(SkipReason::Bounds);
    }

    let replacement = overrides
        .try_take(rule.target_id, cycle, rule.replace_len as usize)
        .ok_or(SkipReason::NoOverride)?;

    let payload = template.payload_mut();
    let start = rule.replace_offset as usize;
    payload[start..start + replacement.len()].copy_from_slice(replacement.data());

    if rule.e2e_len > 0 {
        let start = rule.e2e_offset as usize;
        let end = start + rule.e2e_len as usize;
        let counter = next_alive_counter(payload[start]);
        payload[start] = (payload[start] & 0xF0) | counter;
        payload[start - 1] = crc::e2e_crc(&payload[start..end], rule.e2e_init);
    }

    template.set_cycle(cycle);
    template.reseal();
    Ok(())
}

/// Control handle used by the host command path.
#[derive(Clone)]
pub struct InjectorHandle {
    shared: Arc<Shared>,
}

impl InjectorHandle {
    /// Queues replacement bytes for the next injection of frame `id` on
    /// cycle base `base`.
    ///
    /// `data` is self-identifying: `[id_hi, id_lo, base, replacement...]`.
    /// The prefix must agree with `id`/`base`, and the replacement length
    /// must equal `replace_len` of a trigger rule targeting `id` with that
    /// cycle base.
    pub fn submit_override(&self, id: u16, base: u8, data: &[u8]) -> Result<(), CoreError> {
        let entry = self
            .validate_override(id, base, data)
            .inspect_err(|_| self.shared.overrides.record_rejection())?;
        self.shared.overrides.push(entry)
    }

    fn validate_override(&self, id: u16, base: u8, data: &[u8]) -> Result<HostOverride, CoreError> {
        let prefix_ok = data.len() >= OVERRIDE_PREFIX_LEN
            && u16::from_be_bytes([data[0], data[1]]) == id
            && data[2] == base;
        if !prefix_ok {
            return Err(CoreError::OverridePrefixMismatch { id, base });
        }

        let replacement = &data[OVERRIDE_PREFIX_LEN..];
        let rule = self
            .shared
            .rules
            .trigger_rules
            .iter()
            .find(|r| {
                r.target_id == id
                    && r.cycle_base == base
                    && r.replace_len as usize == replacement.len()
            })
            .ok_or(CoreError::NoMatchingTrigger {
                id,
                base,
                len: replacement.len(),
            })?;

        HostOverride::new(id, rule.cycle_mask, rule.cycle_base, replacement).ok_or(
            CoreError::NoMatchingTrigger {
                id,
                base,
                len: replacement.len(),
            },
        )
    }

    pub fn set_injection_enabled(&self, enabled: bool) {
        let previous = self.shared.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!("Injection {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn injection_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn pending_overrides(&self) -> usize {
        self.shared.overrides.pending()
    }

    pub fn override_stats(&self) -> OverrideStats {
        self.shared.overrides.stats()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.shared.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::CacheRule;
    use frbridge_protocol::{override_slice, Indicators, Source};

    const EPS_PAYLOAD: [u8; 16] = [
        0xFE, 0xFE, 0xD0, 0xE7, 0xFE, 0xFE, 0x00, 0xFE, 0x74, 0xFE, 0xD0, 0xE7, 0xFF, 0x7F, 0x1E,
        0x00,
    ];

    #[derive(Default)]
    struct Recorder {
        armed: Vec<(Direction, Vec<u8>)>,
    }

    impl Transmitter for Recorder {
        fn arm_transmission(&mut self, direction: Direction, bytes: &[u8]) {
            self.armed.push((direction, bytes.to_vec()));
        }
    }

    fn eps_trigger() -> TriggerRule {
        TriggerRule {
            trigger_id: 0x40,
            target_id: 0x44,
            cycle_mask: 1,
            cycle_base: 0,
            e2e_offset: 9,
            e2e_len: 7,
            e2e_init: 0xDC,
            replace_offset: 12,
            replace_len: 2,
            direction: Direction::ToEcu,
        }
    }

    fn eps_rules() -> RuleSet {
        RuleSet {
            cache_rules: vec![CacheRule {
                watch_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
            }],
            trigger_rules: vec![eps_trigger()],
        }
    }

    fn frame(id: u16, cycle: u8, payload: &[u8]) -> (Frame, Vec<u8>) {
        let frame = Frame::new(id, cycle, Indicators::new(), payload, Source::Vehicle).unwrap();
        let raw = frame.encode().to_vec();
        (frame, raw)
    }

    fn feed(
        engine: &mut TriggerEngine,
        tx: &mut Recorder,
        id: u16,
        cycle: u8,
        payload: &[u8],
    ) -> EngineOutcome {
        let (f, raw) = frame(id, cycle, payload);
        engine.process(&f, &raw, tx)
    }

    #[test]
    fn test_alive_counter_wraps_before_sentinel() {
        assert_eq!(next_alive_counter(0), 1);
        assert_eq!(next_alive_counter(13), 14);
        assert_eq!(next_alive_counter(14), 0);
        assert_eq!(next_alive_counter(0xF), 0);
        assert_eq!(next_alive_counter(0xA3), 4);
    }

    #[test]
    fn test_eps_injection_bytes() {
        let (mut engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();
        let mut tx = Recorder::default();

        let cached = feed(&mut engine, &mut tx, 0x44, 4, &EPS_PAYLOAD);
        assert_eq!(cached.cached, 1);

        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[0x12, 0x34]))
            .unwrap();
        let outcome = feed(&mut engine, &mut tx, 0x40, 6, &[1, 2, 3, 4]);
        assert_eq!(outcome.armed, Some(Direction::ToEcu));

        let expected: [u8; 24] = [
            0x00, 0x44, 0x11, 0x38, 0x06, 0xFE, 0xFE, 0xD0, 0xE7, 0xFE, 0xFE, 0x00, 0xFE, 0x31,
            0xF0, 0xD0, 0xE7, 0x12, 0x34, 0x1E, 0x00, 0x06, 0xC7, 0x42,
        ];
        assert_eq!(tx.armed.len(), 1);
        assert_eq!(tx.armed[0].0, Direction::ToEcu);
        assert_eq!(&tx.armed[0].1[..], &expected[..]);

        // the armed bytes are a valid frame for the current cycle
        let injected = Frame::decode(&expected, Source::Ecu).unwrap();
        assert!(injected.is_valid(&expected));
        assert_eq!(injected.cycle_count, 6);
    }

    #[test]
    fn test_template_mutations_accumulate() {
        let (mut engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();
        let mut tx = Recorder::default();
        feed(&mut engine, &mut tx, 0x44, 4, &EPS_PAYLOAD);

        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[0x12, 0x34]))
            .unwrap();
        feed(&mut engine, &mut tx, 0x40, 6, &[0; 4]);
        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[0x56, 0x78]))
            .unwrap();
        feed(&mut engine, &mut tx, 0x40, 8, &[0; 4]);

        let expected: [u8; 24] = [
            0x00, 0x44, 0x11, 0x38, 0x08, 0xFE, 0xFE, 0xD0, 0xE7, 0xFE, 0xFE, 0x00, 0xFE, 0xDC,
            0xF1, 0xD0, 0xE7, 0x56, 0x78, 0x1E, 0x00, 0xF4, 0x0B, 0x00,
        ];
        assert_eq!(tx.armed.len(), 2);
        assert_eq!(&tx.armed[1].1[..], &expected[..]);
    }

    #[test]
    fn test_cache_overwrite_keeps_latest() {
        let (mut engine, _handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();
        let mut tx = Recorder::default();

        let first = [0x11; 16];
        let second = [0x22; 16];
        feed(&mut engine, &mut tx, 0x44, 2, &first);
        feed(&mut engine, &mut tx, 0x44, 4, &second);

        let (_, raw) = frame(0x44, 4, &second);
        let template = engine.template(0).unwrap();
        assert!(template.is_valid());
        assert_eq!(template.bytes(), &raw[..]);

        // odd cycle does not match the cache rule
        feed(&mut engine, &mut tx, 0x44, 5, &first);
        assert_eq!(engine.template(0).unwrap().bytes(), &raw[..]);
    }

    #[test]
    fn test_override_single_use() {
        let (mut engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();
        let mut tx = Recorder::default();
        feed(&mut engine, &mut tx, 0x44, 0, &EPS_PAYLOAD);

        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[0xAB, 0xCD]))
            .unwrap();
        assert!(feed(&mut engine, &mut tx, 0x40, 2, &[0; 4]).armed.is_some());
        assert!(feed(&mut engine, &mut tx, 0x40, 4, &[0; 4]).armed.is_none());

        assert_eq!(tx.armed.len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.injected, 1);
        assert_eq!(stats.skipped_no_override, 1);
    }

    #[test]
    fn test_at_most_one_arm_per_frame() {
        let mut rules = eps_rules();
        rules.cache_rules.push(CacheRule {
            watch_id: 0x45,
            cycle_mask: 1,
            cycle_base: 0,
        });
        for target in [0x44u16, 0x45] {
            for direction in [Direction::ToEcu, Direction::ToVehicle] {
                rules.trigger_rules.push(TriggerRule {
                    target_id: target,
                    direction,
                    e2e_len: 0,
                    ..eps_trigger()
                });
            }
        }
        let (mut engine, handle) = TriggerEngine::new(rules, 8, true).unwrap();
        let mut tx = Recorder::default();
        feed(&mut engine, &mut tx, 0x44, 0, &EPS_PAYLOAD);
        feed(&mut engine, &mut tx, 0x45, 0, &EPS_PAYLOAD);

        for _ in 0..3 {
            handle
                .submit_override(0x44, 0, &override_slice(0x44, 0, &[1, 2]))
                .unwrap();
            handle
                .submit_override(0x45, 0, &override_slice(0x45, 0, &[3, 4]))
                .unwrap();
        }

        for cycle in [0u8, 2, 4] {
            let before = tx.armed.len();
            feed(&mut engine, &mut tx, 0x40, cycle, &[0; 4]);
            assert_eq!(tx.armed.len() - before, 1);
        }
    }

    #[test]
    fn test_skip_reasons() {
        let (mut engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();
        let mut tx = Recorder::default();

        // no template yet
        feed(&mut engine, &mut tx, 0x40, 0, &[0; 4]);
        assert_eq!(engine.stats().skipped_no_template, 1);

        // template too short for the replace and E2E ranges
        feed(&mut engine, &mut tx, 0x44, 0, &[0; 8]);
        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[1, 2]))
            .unwrap();
        feed(&mut engine, &mut tx, 0x40, 0, &[0; 4]);
        assert_eq!(engine.stats().skipped_bounds, 1);
        // bounds failure leaves the override pending
        assert_eq!(handle.pending_overrides(), 1);

        // odd cycle does not match the trigger predicate at all
        feed(&mut engine, &mut tx, 0x40, 1, &[0; 4]);
        assert_eq!(engine.stats().triggers_matched, 2);
        assert!(tx.armed.is_empty());
    }

    #[test]
    fn test_disabled_still_caches() {
        let (mut engine, handle) = TriggerEngine::new(eps_rules(), 4, false).unwrap();
        let mut tx = Recorder::default();
        assert!(!handle.injection_enabled());

        feed(&mut engine, &mut tx, 0x44, 0, &EPS_PAYLOAD);
        handle
            .submit_override(0x44, 0, &override_slice(0x44, 0, &[1, 2]))
            .unwrap();
        feed(&mut engine, &mut tx, 0x40, 0, &[0; 4]);

        assert!(engine.template(0).unwrap().is_valid());
        assert!(tx.armed.is_empty());
        assert_eq!(engine.stats().skipped_disabled, 1);

        handle.set_injection_enabled(true);
        feed(&mut engine, &mut tx, 0x40, 2, &[0; 4]);
        assert_eq!(tx.armed.len(), 1);
    }

    #[test]
    fn test_submit_validation() {
        let (_engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();

        // prefix names another frame
        assert!(matches!(
            handle.submit_override(0x44, 0, &override_slice(0x45, 0, &[1, 2])),
            Err(CoreError::OverridePrefixMismatch { .. })
        ));
        // prefix base disagrees
        assert!(matches!(
            handle.submit_override(0x44, 0, &override_slice(0x44, 1, &[1, 2])),
            Err(CoreError::OverridePrefixMismatch { .. })
        ));
        // wrong replacement length
        assert!(matches!(
            handle.submit_override(0x44, 0, &override_slice(0x44, 0, &[1, 2, 3])),
            Err(CoreError::NoMatchingTrigger { len: 3, .. })
        ));
        // no rule for that base
        assert!(matches!(
            handle.submit_override(0x44, 1, &override_slice(0x44, 1, &[1, 2])),
            Err(CoreError::NoMatchingTrigger { .. })
        ));
        // shorter than the prefix
        assert!(handle.submit_override(0x44, 0, &[0, 0]).is_err());
        // base byte first, id after it
        assert!(matches!(
            handle.submit_override(0x44, 0, &[0x00, 0x00, 0x44, 1, 2]),
            Err(CoreError::OverridePrefixMismatch { .. })
        ));

        assert_eq!(handle.override_stats().rejected, 6);
        assert_eq!(handle.pending_overrides(), 0);
    }

    #[test]
    fn test_accepts_host_tool_prefix() {
        let (_engine, handle) = TriggerEngine::new(eps_rules(), 4, true).unwrap();

        // frame 0x44 base 0, torque bytes as the injection script sends them
        handle
            .submit_override(0x44, 0, &[0x00, 0x44, 0x00, 0x9C, 0x82])
            .unwrap();
        assert_eq!(handle.pending_overrides(), 1);
        assert_eq!(handle.override_stats().accepted, 1);
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let mut rules = eps_rules();
        rules.cache_rules.clear();
        assert!(TriggerEngine::new(rules, 4, true).is_err());
        assert!(TriggerEngine::new(eps_rules(), 0, true).is_err());
    }
}
