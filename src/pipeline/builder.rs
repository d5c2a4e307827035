//! Startup-time pipeline assembly.

// std
use std::collections::{BTreeMap, HashMap};
// self
use crate::{
	_prelude::*,
	error::PipelineConfigurationError,
	pipeline::{Capability, Chain, Handler, Pipeline, Stage},
};

/// Collects base handlers and stage declarations, then resolves them into a [`Pipeline`].
///
/// Stages attached to the same capability wrap in declaration order, so the last declared
/// stage is the outermost one.
#[derive(Default)]
pub struct PipelineBuilder {
	bases: BTreeMap<Capability, Arc<dyn Handler>>,
	stages: Vec<(Capability, Arc<dyn Stage>)>,
}
impl PipelineBuilder {
	/// Empty builder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register the base handler for `capability`.
	pub fn register(mut self, capability: Capability, base: Arc<dyn Handler>) -> Result<Self> {
		if self.bases.contains_key(&capability) {
			return Err(
				PipelineConfigurationError::DuplicateBase { capability: capability.to_string() }
					.into(),
			);
		}

		self.bases.insert(capability, base);

		Ok(self)
	}

	/// Declare a stage, attaching it to the single registered capability it supports.
	pub fn add_stage(self, stage: Arc<dyn Stage>) -> Result<Self> {
		let candidates: Vec<_> =
			self.bases.keys().filter(|capability| stage.supports(capability)).cloned().collect();

		match candidates.as_slice() {
			[] => Err(PipelineConfigurationError::NoBaseForStage { stage: stage.name().into() }.into()),
			[capability] => {
				let capability = capability.clone();

				self.add_stage_to(capability, stage)
			},
			_ => Err(PipelineConfigurationError::AmbiguousStage {
				stage: stage.name().into(),
				candidates: candidates.iter().map(Capability::to_string).collect(),
			}
			.into()),
		}
	}

	/// Declare a stage for an explicit capability.
	pub fn add_stage_to(mut self, capability: Capability, stage: Arc<dyn Stage>) -> Result<Self> {
		if !self.bases.contains_key(&capability) || !stage.supports(&capability) {
			return Err(
				PipelineConfigurationError::NoBaseForStage { stage: stage.name().into() }.into()
			);
		}

		self.stages.push((capability, stage));

		Ok(self)
	}

	/// Resolve every capability into its wrapped chain.
	pub fn build(self) -> Result<Pipeline> {
		let mut chains = HashMap::with_capacity(self.bases.len());

		for (capability, base) in self.bases {
			let mut entry = base;
			let mut names = Vec::new();

			for (_, stage) in self.stages.iter().filter(|(target, _)| *target == capability) {
				entry = stage.wrap(entry);
				names.push(stage.name());
			}

			names.reverse();

			tracing::debug!(%capability, stages = ?names, "pipeline chain assembled");

			chains.insert(capability.clone(), Chain::new(capability, names, entry));
		}

		Ok(Pipeline::new(chains))
	}
}
impl Debug for PipelineBuilder {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("PipelineBuilder")
			.field("capabilities", &self.bases.keys().collect::<Vec<_>>())
			.field(
				"stages",
				&self.stages.iter().map(|(capability, stage)| (capability, stage.name())).collect::<Vec<_>>(),
			)
			.finish()
	}
}
