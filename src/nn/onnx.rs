//! [`InferenceBackend`] for ONNX heatmap networks, powered by [`tract_onnx`].

use std::{borrow::Cow, path::Path, sync::Arc};

use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TypedFact, TypedOp,
};

use super::{tensor::Tensor, InferenceBackend};
use crate::heatmap::Heatmap;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    output: usize,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            output: 0,
        }
    }

    /// Selects which network output holds the heatmaps.
    ///
    /// By default, the first output is used.
    pub fn with_heatmap_output(self, index: usize) -> Self {
        Self {
            output: index,
            ..self
        }
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed or incomplete, if it uses unimplemented
    /// operations, or if its input is not a single square `[1, 3, S, S]` image.
    pub fn load(self) -> anyhow::Result<OnnxBackend> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?;

        let outputs = graph.output_outlets()?;
        let Some(&outlet) = outputs.get(self.output) else {
            anyhow::bail!(
                "heatmap output {} selected, but the network only has {} outputs",
                self.output,
                outputs.len(),
            );
        };

        if graph.inputs.len() != 1 {
            anyhow::bail!(
                "heatmap network has to take exactly 1 input, this one takes {}",
                graph.inputs.len(),
            );
        }
        let fact = graph.input_fact(0)?;
        let input_side = match fact.shape.as_concrete() {
            Some(&[1, 3, h, w]) if h == w => h,
            shape => anyhow::bail!("invalid heatmap network input shape {:?}", shape),
        };

        let plan = SimplePlan::new_for_outputs(graph, &[outlet])?;
        log::debug!("loaded ONNX heatmap network with {input_side}x{input_side} input");

        Ok(OnnxBackend { plan, input_side })
    }
}

/// A heatmap network evaluated on the CPU by `tract`.
///
/// Networks commonly output heatmaps at a fraction of their input resolution (often 1/8). Outputs
/// are upsampled to the input resolution before they are returned from
/// [`InferenceBackend::estimate`].
pub struct OnnxBackend {
    plan: Model,
    input_side: usize,
}

impl OnnxBackend {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!("neural network file must have `.onnx` extension"),
        }

        let model_data = std::fs::read(path)?;
        Ok(Loader::new(model_data.into()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> Loader<'_> {
        Loader::new(raw.into())
    }

    /// Returns the side length of the square network input.
    pub fn input_side(&self) -> usize {
        self.input_side
    }
}

impl InferenceBackend for OnnxBackend {
    fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor> {
        let outputs = self
            .plan
            .run(tvec![TValue::from_const(Arc::new(input.to_tract()?))])?;
        let output = Tensor::from_tract(&outputs[0])?;
        upsample(output, self.input_side)
    }
}

/// Resizes every channel of a `[1, C, H, W]` tensor to `side x side`.
fn upsample(output: Tensor, side: usize) -> anyhow::Result<Tensor> {
    let &[1, c, h, w] = output.shape() else {
        anyhow::bail!(
            "heatmap network output has unexpected shape {:?}",
            output.shape()
        );
    };
    if (h, w) == (side, side) {
        return Ok(output);
    }

    log::trace!("upsampling {c} heatmaps from {w}x{h} to {side}x{side}");
    let plane = h * w;
    let data = output.as_raw_data();
    let resized = (0..c).flat_map(|i| {
        let heatmap = Heatmap::from_slice(w, h, &data[i * plane..(i + 1) * plane]);
        heatmap.resized(side, side).values().to_vec()
    });
    Ok(Tensor::from_iter(&[1, c, side, side], resized))
}
