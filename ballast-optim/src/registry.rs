//! Named optimizer constructors.
//!
//! Every public optimizer name maps to a variant plus feature flags. The
//! `Foreach*` names and their short forms are interchangeable.

use crate::config::{FeatureFlags, OptimizerConfig, Variant};
use crate::driver::BaseOptimizer;
use crate::optimizer_state::{Mode, OptimizerState};
use crate::optimizer_trait::Optimizer;
use crate::param_group::{ParamGroup, ParamRef};
use crate::schedule_free::ScheduleFreeOptimizer;
use ballast_core::BallastError;

/// A registry entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerEntry {
    pub name: &'static str,
    pub variant: Variant,
    pub flags: FeatureFlags,
}

const fn entry(name: &'static str, variant: Variant, flags: FeatureFlags) -> OptimizerEntry {
    OptimizerEntry {
        name,
        variant,
        flags,
    }
}

const PALM: FeatureFlags = FeatureFlags {
    palm: true,
    ..FeatureFlags::NONE
};
const PRECOND_SCHEDULE: FeatureFlags = FeatureFlags {
    use_precond_schedule: true,
    ..FeatureFlags::NONE
};
const PRECOND_SCHEDULE_PALM: FeatureFlags = FeatureFlags {
    palm: true,
    use_precond_schedule: true,
    ..FeatureFlags::NONE
};
const PSGD: FeatureFlags = FeatureFlags {
    exp_avg_input: true,
    ..FeatureFlags::NONE
};
const PSGD_DELAYED: FeatureFlags = FeatureFlags {
    delayed: true,
    ..PSGD
};
const PSGD_CACHED: FeatureFlags = FeatureFlags {
    cached: true,
    ..PSGD
};
const PSGD_CACHED_DELAYED: FeatureFlags = FeatureFlags {
    cached: true,
    delayed: true,
    ..PSGD
};

static REGISTRY: &[OptimizerEntry] = &[
    entry("ForeachAdamW", Variant::AdamW, FeatureFlags::NONE),
    entry("AdamW", Variant::AdamW, FeatureFlags::NONE),
    entry("ForeachRMSprop", Variant::RmsProp, FeatureFlags::NONE),
    entry("RMSprop", Variant::RmsProp, FeatureFlags::NONE),
    entry("ForeachSFAdamW", Variant::SfAdamW, FeatureFlags::NONE),
    entry("SFAdamW", Variant::SfAdamW, FeatureFlags::NONE),
    entry("PaLMForeachSFAdamW", Variant::SfAdamW, PALM),
    entry("PaLMSFAdamW", Variant::SfAdamW, PALM),
    entry("ForeachADOPT", Variant::Adopt, FeatureFlags::NONE),
    entry("ADOPT", Variant::Adopt, FeatureFlags::NONE),
    entry("ForeachLaProp", Variant::LaProp, FeatureFlags::NONE),
    entry("LaProp", Variant::LaProp, FeatureFlags::NONE),
    entry("ForeachSOAP", Variant::Soap, FeatureFlags::NONE),
    entry("SOAP", Variant::Soap, FeatureFlags::NONE),
    entry("PaLMForeachSOAP", Variant::Soap, PALM),
    entry("PaLMSOAP", Variant::Soap, PALM),
    entry("PalmForEachSoap", Variant::Soap, PALM),
    entry("PrecondScheduleForeachSOAP", Variant::Soap, PRECOND_SCHEDULE),
    entry("PrecondScheduleSOAP", Variant::Soap, PRECOND_SCHEDULE),
    entry("PrecondSchedulePaLMForeachSOAP", Variant::Soap, PRECOND_SCHEDULE_PALM),
    entry("PrecondSchedulePaLMSOAP", Variant::Soap, PRECOND_SCHEDULE_PALM),
    entry("ForeachPSGDKron", Variant::PsgdKron, PSGD),
    entry("PSGDKron", Variant::PsgdKron, PSGD),
    entry("ForeachPurePSGD", Variant::PsgdKron, FeatureFlags::NONE),
    entry("PurePSGD", Variant::PsgdKron, FeatureFlags::NONE),
    entry("ForeachDelayedPSGD", Variant::PsgdKron, PSGD_DELAYED),
    entry("DelayedPSGD", Variant::PsgdKron, PSGD_DELAYED),
    entry("ForeachCachedPSGDKron", Variant::PsgdKron, PSGD_CACHED),
    entry("CachedPSGDKron", Variant::PsgdKron, PSGD_CACHED),
    entry("ForeachCachedDelayedPSGDKron", Variant::PsgdKron, PSGD_CACHED_DELAYED),
    entry("CachedDelayedPSGDKron", Variant::PsgdKron, PSGD_CACHED_DELAYED),
];

/// Looks an optimizer up by name.
///
/// # Errors
/// `ConfigurationError` for unknown names.
pub fn lookup(name: &str) -> Result<&'static OptimizerEntry, BallastError> {
    REGISTRY
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| BallastError::ConfigurationError(format!("Unknown optimizer '{}'", name)))
}

/// All registered names.
pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|e| e.name)
}

/// Builds the optimizer registered as `name`.
pub fn create_optimizer(
    name: &str,
    params: Vec<ParamRef>,
    config: OptimizerConfig,
) -> Result<AnyOptimizer, BallastError> {
    let entry = lookup(name)?;
    log::debug!("Resolved optimizer '{}' to {} {:?}", name, entry.variant, entry.flags);
    if entry.variant.is_schedule_free() {
        ScheduleFreeOptimizer::new(entry.variant, entry.flags, params, config)
            .map(AnyOptimizer::ScheduleFree)
    } else {
        BaseOptimizer::new(entry.variant, entry.flags, params, config).map(AnyOptimizer::Base)
    }
}

/// [`create_optimizer`] with the variant's default configuration.
pub fn create_default_optimizer(
    name: &str,
    params: Vec<ParamRef>,
) -> Result<AnyOptimizer, BallastError> {
    let entry = lookup(name)?;
    create_optimizer(name, params, OptimizerConfig::for_variant(entry.variant))
}

/// Either kind of optimizer, as returned by [`create_optimizer`].
#[derive(Debug)]
pub enum AnyOptimizer {
    Base(BaseOptimizer),
    ScheduleFree(ScheduleFreeOptimizer),
}

impl AnyOptimizer {
    pub fn variant(&self) -> Variant {
        match self {
            AnyOptimizer::Base(o) => o.variant(),
            AnyOptimizer::ScheduleFree(o) => o.base().variant(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            AnyOptimizer::Base(_) => Mode::Train,
            AnyOptimizer::ScheduleFree(o) => o.mode(),
        }
    }

    /// Switches to train mode. No-op for optimizers without modes.
    pub fn train(&mut self) -> Result<(), BallastError> {
        match self {
            AnyOptimizer::Base(_) => Ok(()),
            AnyOptimizer::ScheduleFree(o) => o.train(),
        }
    }

    /// Switches to eval mode. No-op for optimizers without modes.
    pub fn eval(&mut self) -> Result<(), BallastError> {
        match self {
            AnyOptimizer::Base(_) => Ok(()),
            AnyOptimizer::ScheduleFree(o) => o.eval(),
        }
    }
}

impl Optimizer for AnyOptimizer {
    fn step(&mut self) -> Result<(), BallastError> {
        match self {
            AnyOptimizer::Base(o) => o.step(),
            AnyOptimizer::ScheduleFree(o) => o.step(),
        }
    }

    fn zero_grad(&mut self) {
        match self {
            AnyOptimizer::Base(o) => o.zero_grad(),
            AnyOptimizer::ScheduleFree(o) => o.zero_grad(),
        }
    }

    fn add_param_group(&mut self, param_group: ParamGroup) -> Result<(), BallastError> {
        match self {
            AnyOptimizer::Base(o) => o.add_param_group(param_group),
            AnyOptimizer::ScheduleFree(o) => o.add_param_group(param_group),
        }
    }

    fn param_groups(&self) -> &[ParamGroup] {
        match self {
            AnyOptimizer::Base(o) => o.param_groups(),
            AnyOptimizer::ScheduleFree(o) => o.param_groups(),
        }
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        match self {
            AnyOptimizer::Base(o) => o.param_groups_mut(),
            AnyOptimizer::ScheduleFree(o) => o.param_groups_mut(),
        }
    }

    fn state_dict(&self) -> Result<OptimizerState, BallastError> {
        match self {
            AnyOptimizer::Base(o) => o.state_dict(),
            AnyOptimizer::ScheduleFree(o) => o.state_dict(),
        }
    }

    fn load_state_dict(&mut self, state_dict: &OptimizerState) -> Result<(), BallastError> {
        match self {
            AnyOptimizer::Base(o) => o.load_state_dict(state_dict),
            AnyOptimizer::ScheduleFree(o) => o.load_state_dict(state_dict),
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
