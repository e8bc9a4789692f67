// machine.rs — Machine parameters and compilation target
//
// `MachineParams` is the three-number machine model driving the cost model:
// available parallelism, last-level cache size in KB and the load/compute
// balance. `Target` names the architecture and SIMD features, which fix the
// natural vector width.
//
// Preconditions: none.
// Postconditions: every constructed `MachineParams` has positive fields and
//   round-trips through its canonical string form.
// Failure modes: malformed strings → `ScheduleError::MalformedMachineParams`
//   / `ScheduleError::MalformedTarget`.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

// ── Machine parameters ───────────────────────────────────────────────────

/// Immutable machine model. Canonical text form: `"P,L,B"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineParams {
    parallelism: u32,
    last_level_cache_kb: u32,
    balance: u32,
}

impl MachineParams {
    pub fn new(parallelism: u32, last_level_cache_kb: u32, balance: u32) -> Result<Self, ScheduleError> {
        let input = format!("{parallelism},{last_level_cache_kb},{balance}");
        for (field, value) in [
            ("parallelism", parallelism),
            ("last-level cache size", last_level_cache_kb),
            ("balance", balance),
        ] {
            if value == 0 {
                return Err(ScheduleError::MalformedMachineParams {
                    input,
                    reason: format!("{field} must be positive"),
                });
            }
        }
        Ok(MachineParams {
            parallelism,
            last_level_cache_kb,
            balance,
        })
    }

    /// A typical multicore desktop: 16 cores, 16 MB LLC, balance 40.
    pub fn generic() -> Self {
        MachineParams {
            parallelism: 16,
            last_level_cache_kb: 16 * 1024,
            balance: 40,
        }
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn last_level_cache_kb(&self) -> u32 {
        self.last_level_cache_kb
    }

    pub fn balance(&self) -> u32 {
        self.balance
    }

    pub fn cache_bytes(&self) -> u64 {
        u64::from(self.last_level_cache_kb) * 1024
    }
}

impl Default for MachineParams {
    fn default() -> Self {
        MachineParams::generic()
    }
}

impl fmt::Display for MachineParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.parallelism, self.last_level_cache_kb, self.balance
        )
    }
}

impl FromStr for MachineParams {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| ScheduleError::MalformedMachineParams {
            input: s.to_string(),
            reason,
        };
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(malformed(format!(
                "expected 3 comma-separated fields, found {}",
                fields.len()
            )));
        }
        let mut values = [0u32; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .parse::<u32>()
                .map_err(|_| malformed(format!("'{field}' is not a positive integer")))?;
        }
        MachineParams::new(values[0], values[1], values[2]).map_err(|e| match e {
            ScheduleError::MalformedMachineParams { reason, .. } => malformed(reason),
            other => other,
        })
    }
}

// ── Target ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    Arm,
}

impl Arch {
    fn name(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::Arm => "arm",
        }
    }
}

/// SIMD feature flags that change the vector width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    Sse41,
    Avx,
    Avx2,
    Avx512,
    Neon,
}

impl Feature {
    fn from_name(name: &str) -> Option<Feature> {
        Some(match name {
            "sse41" => Feature::Sse41,
            "avx" => Feature::Avx,
            "avx2" => Feature::Avx2,
            "avx512" => Feature::Avx512,
            "neon" => Feature::Neon,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Feature::Sse41 => "sse41",
            Feature::Avx => "avx",
            Feature::Avx2 => "avx2",
            Feature::Avx512 => "avx512",
            Feature::Neon => "neon",
        }
    }
}

/// Compilation target: `arch-bits[-feature...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: Arch,
    pub bits: u32,
    /// Sorted, deduplicated.
    pub features: Vec<Feature>,
}

impl Target {
    pub fn new(arch: Arch, bits: u32, features: &[Feature]) -> Self {
        let mut features = features.to_vec();
        features.sort();
        features.dedup();
        Target {
            arch,
            bits,
            features,
        }
    }

    /// The machine this binary was built for.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Target::new(Arch::Arm, 64, &[Feature::Neon])
        } else if cfg!(target_arch = "arm") {
            Target::new(Arch::Arm, 32, &[Feature::Neon])
        } else if cfg!(target_arch = "x86") {
            Target::new(Arch::X86, 32, &[])
        } else {
            Target::new(Arch::X86, 64, &[Feature::Avx2])
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Natural SIMD register width in bytes.
    pub fn vector_bytes(&self) -> u32 {
        match self.arch {
            Arch::X86 if self.has_feature(Feature::Avx512) => 64,
            Arch::X86 if self.has_feature(Feature::Avx2) || self.has_feature(Feature::Avx) => 32,
            Arch::X86 | Arch::Arm => 16,
        }
    }

    /// Vector lanes for elements of `elem_bytes` bytes (at least 1).
    pub fn lanes(&self, elem_bytes: u32) -> u32 {
        (self.vector_bytes() / elem_bytes.max(1)).max(1)
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::host()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch.name(), self.bits)?;
        for feature in &self.features {
            write!(f, "-{}", feature.name())?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| ScheduleError::MalformedTarget {
            input: s.to_string(),
            reason,
        };
        let s = s.trim();
        if s == "host" {
            return Ok(Target::host());
        }
        let mut parts = s.split('-');
        let arch = match parts.next() {
            Some("x86") => Arch::X86,
            Some("arm") => Arch::Arm,
            Some(other) => return Err(malformed(format!("unknown architecture '{other}'"))),
            None => return Err(malformed("empty target".to_string())),
        };
        let bits = match parts.next() {
            Some("32") => 32,
            Some("64") => 64,
            Some(other) => return Err(malformed(format!("unsupported bit width '{other}'"))),
            None => return Err(malformed("missing bit width".to_string())),
        };
        let mut features = Vec::new();
        for name in parts {
            let feature = Feature::from_name(name)
                .ok_or_else(|| malformed(format!("unknown feature '{name}'")))?;
            features.push(feature);
        }
        Ok(Target::new(arch, bits, &features))
    }
}
