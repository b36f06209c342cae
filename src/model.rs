use std::path::Path;

use ndarray::{Array4, ArrayD, IxDyn};
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Output, Session, SessionOptions, SessionRunArgs,
    Tensor,
};
use tracing::debug;

use crate::error::AppError;

/// Loads serialized models from disk.
pub trait ModelRuntime: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedModel>, AppError>;
}

/// A model held in memory and ready for a forward pass.
pub trait LoadedModel {
    /// Declared input dimensions, `None` per dimension when it is dynamic.
    /// Returns `None` when the rank itself is unknown.
    fn input_shape(&self) -> Option<Vec<Option<i64>>>;

    fn run(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, AppError>;
}

/// Runs frozen TensorFlow graphs (GraphDef protobufs).
pub struct TensorflowRuntime {
    input_op: String,
    output_op: String,
}

impl TensorflowRuntime {
    pub fn new(input_op: impl Into<String>, output_op: impl Into<String>) -> Self {
        TensorflowRuntime {
            input_op: input_op.into(),
            output_op: output_op.into(),
        }
    }
}

impl ModelRuntime for TensorflowRuntime {
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedModel>, AppError> {
        let model_bytes = std::fs::read(path)
            .map_err(|e| AppError::ModelLoad(format!("cannot read {:?}: {}", path, e)))?;

        let mut graph = Graph::new();
        graph
            .import_graph_def(&model_bytes, &ImportGraphDefOptions::new())
            .map_err(|e| AppError::ModelLoad(e.to_string()))?;

        let session = Session::new(&SessionOptions::new(), &graph)
            .map_err(|e| AppError::ModelLoad(e.to_string()))?;

        let input = find_operation(&graph, &self.input_op)?;
        let output = find_operation(&graph, &self.output_op)?;
        debug!("Loaded graph from {:?}", path);

        Ok(Box::new(FrozenGraph {
            graph,
            session,
            input,
            output,
        }))
    }
}

fn find_operation(graph: &Graph, name: &str) -> Result<Operation, AppError> {
    graph
        .operation_by_name(name)
        .map_err(|e| AppError::ModelLoad(format!("failed to look up operation '{}': {}", name, e)))?
        .ok_or_else(|| AppError::ModelLoad(format!("operation '{}' not found in graph", name)))
}

struct FrozenGraph {
    graph: Graph,
    session: Session,
    input: Operation,
    output: Operation,
}

impl LoadedModel for FrozenGraph {
    fn input_shape(&self) -> Option<Vec<Option<i64>>> {
        let shape = self
            .graph
            .tensor_shape(Output {
                operation: self.input.clone(),
                index: 0,
            })
            .ok()?;
        let rank = shape.dims()?;
        Some((0..rank).map(|i| shape[i]).collect())
    }

    fn run(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, AppError> {
        if let Some(declared) = self.input_shape() {
            check_input_shape(&declared, input.shape())?;
        }

        let dims: Vec<u64> = input.shape().iter().map(|&d| d as u64).collect();
        let values = input
            .as_slice()
            .ok_or_else(|| AppError::Inference("input tensor is not contiguous".into()))?;
        let input_tensor = Tensor::<f32>::new(&dims)
            .with_values(values)
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&self.input, 0, &input_tensor);
        let output_token = args.request_fetch(&self.output, 0);
        self.session
            .run(&mut args)
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let output_tensor: Tensor<f32> = args
            .fetch(output_token)
            .map_err(|e| AppError::Inference(e.to_string()))?;
        let output_dims: Vec<usize> = output_tensor.dims().iter().map(|&d| d as usize).collect();

        ArrayD::from_shape_vec(IxDyn(&output_dims), output_tensor.to_vec())
            .map_err(|e| AppError::Inference(format!("unexpected output layout: {}", e)))
    }
}

/// Fails when a fixed dimension the model declares differs from the tensor.
/// Dynamic dimensions accept any size.
fn check_input_shape(declared: &[Option<i64>], actual: &[usize]) -> Result<(), AppError> {
    let matches = declared.len() == actual.len()
        && declared
            .iter()
            .zip(actual)
            .all(|(declared, &actual)| match declared {
                Some(d) if *d >= 0 => *d as usize == actual,
                _ => true,
            });
    if matches {
        Ok(())
    } else {
        Err(AppError::Inference(format!(
            "input shape {:?} does not match the model's declared shape {:?}",
            actual, declared
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorflow::{DataType, Shape};

    /// Writes a GraphDef holding `x: float[?, 8, 6, 3] -> Identity`.
    fn identity_graph(dir: &Path) -> std::path::PathBuf {
        let mut graph = Graph::new();
        let x = {
            let mut op = graph.new_operation("Placeholder", "x").unwrap();
            op.set_attr_type("dtype", DataType::Float).unwrap();
            op.set_attr_shape("shape", &Shape::from(Some(vec![None, Some(8), Some(6), Some(3)])))
                .unwrap();
            op.finish().unwrap()
        };
        {
            let mut op = graph.new_operation("Identity", "Identity").unwrap();
            op.add_input(Output {
                operation: x,
                index: 0,
            });
            op.set_attr_type("T", DataType::Float).unwrap();
            op.finish().unwrap();
        }

        let path = dir.join("identity.pb");
        std::fs::write(&path, graph.graph_def().unwrap()).unwrap();
        path
    }

    #[test]
    fn frozen_graph_reports_declared_input_shape() {
        let dir = tempfile::tempdir().unwrap();
        let model = TensorflowRuntime::new("x", "Identity")
            .load(&identity_graph(dir.path()))
            .unwrap();
        assert_eq!(
            model.input_shape(),
            Some(vec![None, Some(8), Some(6), Some(3)])
        );
    }

    #[test]
    fn frozen_graph_runs_forward_pass() {
        let dir = tempfile::tempdir().unwrap();
        let model = TensorflowRuntime::new("x", "Identity")
            .load(&identity_graph(dir.path()))
            .unwrap();

        let input = Array4::from_shape_fn((1, 8, 6, 3), |(_, y, x, c)| {
            (y * 18 + x * 3 + c) as f32 / 144.0
        });
        let output = model.run(&input).unwrap();
        assert_eq!(output.shape(), &[1, 8, 6, 3]);
        assert_eq!(output.as_slice().unwrap(), input.as_slice().unwrap());
    }

    #[test]
    fn frozen_graph_rejects_wrong_spatial_size() {
        let dir = tempfile::tempdir().unwrap();
        let model = TensorflowRuntime::new("x", "Identity")
            .load(&identity_graph(dir.path()))
            .unwrap();

        let err = model.run(&Array4::zeros((1, 4, 4, 3))).unwrap_err();
        assert!(matches!(err, AppError::Inference(_)));
    }

    #[test]
    fn declared_shape_check_allows_dynamic_dims() {
        let declared = [None, Some(8), None, Some(3)];
        assert!(check_input_shape(&declared, &[2, 8, 100, 3]).is_ok());
        assert!(check_input_shape(&declared, &[1, 9, 100, 3]).is_err());
        assert!(check_input_shape(&declared, &[1, 8, 3]).is_err());
    }

    #[test]
    fn missing_file_is_load_error() {
        let runtime = TensorflowRuntime::new("x", "Identity");
        let dir = tempfile::tempdir().unwrap();
        let err = runtime.load(&dir.path().join("absent.pb")).err().unwrap();
        assert!(matches!(err, AppError::ModelLoad(_)));
    }

    #[test]
    fn garbage_graph_is_load_error() {
        let runtime = TensorflowRuntime::new("x", "Identity");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pb");
        std::fs::write(&path, b"this is not a GraphDef").unwrap();
        let err = runtime.load(&path).err().unwrap();
        assert!(matches!(err, AppError::ModelLoad(_)));
    }
}
