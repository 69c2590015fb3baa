//! Cache and trigger rules.
//!
//! Rules are plain data handed to the engine at construction. A cycle
//! predicate `(mask, base)` matches cycle `c` when `c & mask == base`;
//! `mask = 0, base = 0` matches every cycle.

use crate::error::CoreError;
use frbridge_protocol::{Direction, MAX_CYCLE, MAX_FRAME_ID, MAX_PAYLOAD_BYTES};
use serde::{Deserialize, Serialize};

/// Selects frames to remember verbatim as templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRule {
    pub watch_id: u16,
    #[serde(default)]
    pub cycle_mask: u8,
    #[serde(default)]
    pub cycle_base: u8,
}

impl CacheRule {
    pub fn matches(&self, frame_id: u16, cycle: u8) -> bool {
        self.watch_id == frame_id && cycle_matches(cycle, self.cycle_mask, self.cycle_base)
    }
}

/// When `trigger_id` arrives, mutate and transmit the template cached for
/// `target_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub trigger_id: u16,
    pub target_id: u16,
    #[serde(default)]
    pub cycle_mask: u8,
    #[serde(default)]
    pub cycle_base: u8,
    /// Payload offset of the first E2E protected byte. The CRC byte is the
    /// one before it and the alive counter is its low nibble.
    #[serde(default)]
    pub e2e_offset: u8,
    /// Number of protected bytes; 0 disables the E2E update.
    #[serde(default)]
    pub e2e_len: u8,
    #[serde(default)]
    pub e2e_init: u8,
    pub replace_offset: u8,
    pub replace_len: u8,
    pub direction: Direction,
}

impl TriggerRule {
    pub fn matches_cycle(&self, cycle: u8) -> bool {
        cycle_matches(cycle, self.cycle_mask, self.cycle_base)
    }

    /// Smallest template payload the rule can be applied to.
    pub fn min_payload_len(&self) -> usize {
        let replace_end = self.replace_offset as usize + self.replace_len as usize;
        let e2e_end = if self.e2e_len > 0 {
            self.e2e_offset as usize + self.e2e_len as usize
        } else {
            0
        };
        replace_end.max(e2e_end)
    }
}

pub fn cycle_matches(cycle: u8, mask: u8, base: u8) -> bool {
    cycle & mask == base
}

/// The complete rule configuration for one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub cache_rules: Vec<CacheRule>,
    pub trigger_rules: Vec<TriggerRule>,
}

impl RuleSet {
    /// Finds the cache slot holding templates for a trigger rule's target.
    pub fn template_slot(&self, rule: &TriggerRule) -> Option<usize> {
        self.cache_rules.iter().position(|c| {
            c.watch_id == rule.target_id
                && c.cycle_mask == rule.cycle_mask
                && c.cycle_base == rule.cycle_base
        })
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for (index, rule) in self.cache_rules.iter().enumerate() {
            let fail = |reason: String| CoreError::InvalidRule {
                kind: "cache",
                index,
                reason,
            };
            if rule.watch_id > MAX_FRAME_ID {
                return Err(fail(format!("watch_id {:#x} out of range", rule.watch_id)));
            }
            check_predicate(rule.cycle_mask, rule.cycle_base).map_err(fail)?;
        }

        for (index, rule) in self.trigger_rules.iter().enumerate() {
            let fail = |reason: String| CoreError::InvalidRule {
                kind: "trigger",
                index,
                reason,
            };
            if rule.trigger_id > MAX_FRAME_ID || rule.target_id > MAX_FRAME_ID {
                return Err(fail("frame id out of range".to_string()));
            }
            if rule.trigger_id == rule.target_id {
                return Err(fail("trigger_id and target_id must differ".to_string()));
            }
            check_predicate(rule.cycle_mask, rule.cycle_base).map_err(fail)?;
            if rule.replace_len == 0 {
                return Err(fail("replace_len must be non-zero".to_string()));
            }
            if rule.e2e_len > 0 && rule.e2e_offset == 0 {
                return Err(fail(
                    "e2e_offset must leave room for the CRC byte".to_string(),
                ));
            }
            if rule.min_payload_len() > MAX_PAYLOAD_BYTES {
                return Err(fail(format!(
                    "byte ranges end at {} past the {} byte payload limit",
                    rule.min_payload_len(),
                    MAX_PAYLOAD_BYTES
                )));
            }
            if self.template_slot(rule).is_none() {
                return Err(fail(format!(
                    "no cache rule for target {:#x} with mask {:#x} base {}",
                    rule.target_id, rule.cycle_mask, rule.cycle_base
                )));
            }
        }
        Ok(())
    }
}

fn check_predicate(mask: u8, base: u8) -> Result<(), String> {
    if mask > MAX_CYCLE || base > MAX_CYCLE {
        return Err(format!("cycle mask/base must be below 64 (mask {mask}, base {base})"));
    }
    if base & !mask != 0 {
        return Err(format!("cycle_base {base} has bits outside cycle_mask {mask:#x}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps_rules() -> RuleSet {
        RuleSet {
            cache_rules: vec![CacheRule {
                watch_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
            }],
            trigger_rules: vec![TriggerRule {
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
            }],
        }
    }

    #[test]
    fn test_cycle_predicate() {
        assert!(cycle_matches(4, 1, 0));
        assert!(!cycle_matches(5, 1, 0));
        assert!(cycle_matches(7, 0x03, 3));
        assert!(cycle_matches(63, 0, 0));
    }

    #[test]
    fn test_cache_rule_matches() {
        let rule = CacheRule {
            watch_id: 107,
            cycle_mask: 0x03,
            cycle_base: 1,
        };
        assert!(rule.matches(107, 1));
        assert!(rule.matches(107, 5));
        assert!(!rule.matches(107, 2));
        assert!(!rule.matches(108, 1));
    }

    #[test]
    fn test_valid_rules() {
        let rules = eps_rules();
        rules.validate().unwrap();
        assert_eq!(rules.template_slot(&rules.trigger_rules[0]), Some(0));
        assert_eq!(rules.trigger_rules[0].min_payload_len(), 16);
    }

    #[test]
    fn test_trigger_without_cache_rule() {
        let mut rules = eps_rules();
        rules.cache_rules[0].cycle_base = 1;
        let err = rules.validate().unwrap_err();
        assert!(err.to_string().contains("no cache rule"));
    }

    #[test]
    fn test_invalid_trigger_fields() {
        let mut rules = eps_rules();
        rules.trigger_rules[0].target_id = 0x40;
        assert!(rules.validate().is_err());

        let mut rules = eps_rules();
        rules.trigger_rules[0].replace_len = 0;
        assert!(rules.validate().is_err());

        let mut rules = eps_rules();
        rules.trigger_rules[0].e2e_offset = 0;
        assert!(rules.validate().is_err());

        let mut rules = eps_rules();
        rules.trigger_rules[0].replace_offset = 253;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_base_outside_mask() {
        let rules = RuleSet {
            cache_rules: vec![CacheRule {
                watch_id: 1,
                cycle_mask: 0x01,
                cycle_base: 2,
            }],
            trigger_rules: vec![],
        };
        assert!(matches!(
            rules.validate(),
            Err(CoreError::InvalidRule { kind: "cache", index: 0, .. })
        ));
    }

    #[test]
    fn test_rules_from_yaml() {
        let yaml = r#"
cache_rules:
  - watch_id: 68
    cycle_mask: 1
trigger_rules:
  - trigger_id: 64
    target_id: 68
    cycle_mask: 1
    e2e_offset: 9
    e2e_len: 7
    e2e_init: 220
    replace_offset: 12
    replace_len: 2
    direction: to_ecu
"#;
        let rules: RuleSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules, eps_rules());
        rules.validate().unwrap();
    }
}
