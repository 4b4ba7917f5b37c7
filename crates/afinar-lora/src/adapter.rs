//! Adapter injection and the wrapped model handle

use crate::config::LoraConfig;
use crate::layer::LoraLayer;
use afinar_model::{CausalLM, KVCache, ModelConfig, ProjectionDelta};
use anyhow::Result;
use aprender::autograd::Tensor;
use aprender::nn::Module;

/// Adapters for every (layer, target projection) pair
///
/// Implements [`ProjectionDelta`] so the base model's forward paths consult
/// it at each named projection. Also implements `Module` so the adapter
/// parameters serialize through aprender's standard weight format.
pub struct AdapterSet {
    /// Per transformer layer: (projection name, adapter) pairs
    layers: Vec<Vec<(String, LoraLayer)>>,
}

impl AdapterSet {
    /// Build adapters for a model configuration
    ///
    /// Iterates the configured target names; a name the architecture does
    /// not expose fails here, at injection time.
    pub fn for_model(model_config: &ModelConfig, config: &LoraConfig) -> Result<Self> {
        let mut layers = Vec::with_capacity(model_config.n_layer);

        for layer_idx in 0..model_config.n_layer {
            let mut adapters = Vec::with_capacity(config.target_modules.len());
            for (target_idx, name) in config.target_modules.iter().enumerate() {
                let (in_features, out_features) =
                    model_config.projection_dims(name).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Target module '{}' does not exist on this architecture",
                            name
                        )
                    })?;

                // Distinct seed per adapter so A matrices are not cloned
                let seed = model_config
                    .seed
                    .map(|s| s + (layer_idx * config.target_modules.len() + target_idx) as u64);

                adapters.push((
                    name.clone(),
                    LoraLayer::new(in_features, out_features, config, seed),
                ));
            }
            layers.push(adapters);
        }

        Ok(Self { layers })
    }

    /// Total trainable adapter parameters
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter())
            .map(|(_, adapter)| adapter.num_parameters())
            .sum()
    }

    /// Set training mode on every adapter
    pub fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            for (_, adapter) in layer {
                adapter.set_training(training);
            }
        }
    }
}

impl ProjectionDelta for AdapterSet {
    fn delta(&self, layer_idx: usize, name: &str, input: &Tensor) -> Option<Tensor> {
        let layer = self.layers.get(layer_idx)?;
        layer
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, adapter)| adapter.delta(input))
    }
}

impl Module for AdapterSet {
    fn forward(&self, input: &Tensor) -> Tensor {
        // Parameter container; deltas apply through ProjectionDelta.
        input.clone()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter())
            .flat_map(|(_, adapter)| adapter.parameters())
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.iter_mut())
            .flat_map(|(_, adapter)| adapter.parameters_mut())
            .collect()
    }
}

/// Readiness of the wrapped model
///
/// The handle moves strictly forward through these states; generation
/// checks for `Eval` instead of assuming the model is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStage {
    /// Adapters injected, no optimizer step taken yet
    AdapterWrapped,
    /// Inside the training loop
    Training,
    /// Training finished, not yet switched to evaluation mode
    Trained,
    /// Evaluation mode; ready for generation
    Eval,
}

/// A causal language model wrapped with low-rank adapters
///
/// Owns the frozen base model and the trainable adapters. Only adapter
/// parameters are handed to the optimizer; base weights never change.
pub struct LoraModel {
    base: CausalLM,
    adapters: AdapterSet,
    config: LoraConfig,
    stage: ModelStage,
}

impl LoraModel {
    /// Wrap a loaded base model with adapters
    ///
    /// # Errors
    /// Fails when a configured target module name does not exist on the
    /// base architecture.
    pub fn wrap(base: CausalLM, config: LoraConfig) -> Result<Self> {
        let adapters = AdapterSet::for_model(base.config(), &config)?;
        Ok(Self {
            base,
            adapters,
            config,
            stage: ModelStage::AdapterWrapped,
        })
    }

    /// Adapter configuration
    pub fn config(&self) -> &LoraConfig {
        &self.config
    }

    /// The frozen base model
    pub fn base(&self) -> &CausalLM {
        &self.base
    }

    /// Adapter collection
    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Current readiness stage
    pub fn stage(&self) -> ModelStage {
        self.stage
    }

    /// Trainable adapter parameters (for the optimizer); base stays frozen
    pub fn trainable_parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.adapters.parameters_mut()
    }

    /// Number of trainable adapter parameters
    pub fn num_trainable_parameters(&self) -> usize {
        self.adapters.num_parameters()
    }

    /// Total parameters, base plus adapters
    pub fn num_total_parameters(&self) -> usize {
        self.base.num_parameters() + self.adapters.num_parameters()
    }

    /// Fraction of parameters that stay frozen, as a percentage
    pub fn parameter_reduction(&self) -> f64 {
        let trainable = self.num_trainable_parameters() as f64;
        let total = self.num_total_parameters() as f64;
        (1.0 - trainable / total) * 100.0
    }

    /// Enter the training stage
    pub fn begin_training(&mut self) {
        self.base.set_training(true);
        self.adapters.set_training(true);
        self.stage = ModelStage::Training;
    }

    /// Leave the training stage
    pub fn finish_training(&mut self) {
        self.stage = ModelStage::Trained;
    }

    /// Switch to evaluation mode, enabling generation
    pub fn eval(&mut self) {
        self.base.set_training(false);
        self.adapters.set_training(false);
        self.stage = ModelStage::Eval;
    }

    /// Training-loss forward through base plus adapters
    ///
    /// # Errors
    /// Fails unless the handle is in the `Training` stage.
    pub fn forward_training(&self, ids: &Tensor, targets: &Tensor) -> Result<Tensor> {
        if self.stage != ModelStage::Training {
            anyhow::bail!(
                "Model is not in the training stage (current: {:?}); call begin_training() first",
                self.stage
            );
        }
        self.base.forward_training(ids, targets, Some(&self.adapters))
    }

    /// Inference forward through base plus adapters with a KV cache
    ///
    /// # Errors
    /// Fails unless the handle is in the `Eval` stage; readiness for
    /// inference is a checked precondition, not an assumption.
    pub fn forward_cache(&self, ids: &Tensor, kv_cache: Option<&mut KVCache>) -> Result<Tensor> {
        if self.stage != ModelStage::Eval {
            anyhow::bail!(
                "Model is not in evaluation mode (current: {:?}); call eval() first",
                self.stage
            );
        }
        self.base.forward_cache(ids, kv_cache, Some(&self.adapters))
    }
}
