// Static catalog of supported segmentation models

use crate::core::errors::CatalogError;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How raw model output is turned into a foreground probability map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskActivation {
    /// Output is already a probability-like map; stretch it to [0, 1]
    MinMax,
    /// Output is raw logits; sigmoid, then stretch to [0, 1]
    SigmoidMinMax,
    /// Output is per-class scores over channels; any non-background class is foreground
    ArgmaxForeground,
}

/// Description of one segmentation model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub description: &'static str,
    /// Weight file name inside the models directory
    pub file_name: &'static str,
    /// Square input side expected by the network
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub activation: MaskActivation,
}

static BUILTIN_MODELS: [ModelDescriptor; 6] = [
    ModelDescriptor {
        id: "u2net",
        description: "General purpose - good quality/speed balance",
        file_name: "u2net.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        activation: MaskActivation::MinMax,
    },
    ModelDescriptor {
        id: "u2net_human_seg",
        description: "Optimized for people",
        file_name: "u2net_human_seg.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        activation: MaskActivation::MinMax,
    },
    ModelDescriptor {
        id: "u2net_cloth_seg",
        description: "Optimized for clothing",
        file_name: "u2net_cloth_seg.onnx",
        input_size: 768,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        activation: MaskActivation::ArgmaxForeground,
    },
    ModelDescriptor {
        id: "isnet-general-use",
        description: "General purpose - high quality",
        file_name: "isnet-general-use.onnx",
        input_size: 1024,
        mean: [0.5, 0.5, 0.5],
        std: [1.0, 1.0, 1.0],
        activation: MaskActivation::MinMax,
    },
    ModelDescriptor {
        id: "birefnet-general",
        description: "General purpose - very high quality (slower)",
        file_name: "BiRefNet-general-epoch_244.onnx",
        input_size: 1024,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        activation: MaskActivation::SigmoidMinMax,
    },
    ModelDescriptor {
        id: "silueta",
        description: "People - fast",
        file_name: "silueta.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        activation: MaskActivation::MinMax,
    },
];

/// Ordered, immutable model catalog
#[derive(Debug, Clone, Copy)]
pub struct ModelCatalog {
    models: &'static [ModelDescriptor],
}

impl ModelCatalog {
    /// Catalog with every built-in model, in a stable order
    pub fn builtin() -> Self {
        Self {
            models: &BUILTIN_MODELS,
        }
    }

    pub fn descriptor_for(&self, id: &str) -> Result<&'static ModelDescriptor, CatalogError> {
        self.models
            .iter()
            .find(|descriptor| descriptor.id == id)
            .ok_or_else(|| CatalogError::UnknownModel {
                requested: id.to_string(),
                available: self.ids().into_iter().map(String::from).collect(),
            })
    }

    /// All descriptors in insertion order
    pub fn list_all(&self) -> &'static [ModelDescriptor] {
        self.models
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.models.iter().map(|descriptor| descriptor.id).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.iter().any(|descriptor| descriptor.id == id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
