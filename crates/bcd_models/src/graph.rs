//! Named computation graphs.
//!
//! A [`Graph`] is an ordered list of named nodes, each applying an [`Op`] to
//! the outputs of earlier nodes. Nodes are stored in topological order, so a
//! forward pass is a single sweep. A node can itself hold a whole graph
//! ([`Op::Model`]), which is how the classifier nests its backbone and why
//! explainers can run the backbone on its own.
//!
//! Parameters are addressed by slash-separated paths: top-level layer name,
//! then nested node names, then the parameter name, e.g.
//! `resnet50/conv1_conv/kernel` or `output_layer/bias`.

use std::collections::{BTreeMap, HashMap};

use bcd_core::BcdError;
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::module::max_pool2d;

use crate::layers::{BatchNormLayer, Conv2dLayer, DenseLayer, MaxPool2dSpec, ParamLayer};
use crate::normalize::CaffeNormalize;

/// Index of a node within its graph.
pub type NodeId = usize;

/// Parameter shapes per top-level layer, keyed by parameter path.
pub type ParamShapes = BTreeMap<String, BTreeMap<String, Vec<usize>>>;

/// Graph construction and evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Two nodes share a name.
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// A name or id does not exist.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Wrong number of inputs for an op.
    #[error("Node {node} expects {expected} inputs, got {got}")]
    Arity {
        /// Node name.
        node: String,
        /// Inputs required by the op.
        expected: usize,
        /// Inputs supplied.
        got: usize,
    },

    /// Input tensor has the wrong rank or size.
    #[error("Shape mismatch at {node}: {detail}")]
    Shape {
        /// Node name.
        node: String,
        /// What was wrong.
        detail: String,
    },

    /// Graph has no designated output.
    #[error("Graph {0} has no output node")]
    NoOutput(String),

    /// Invalid architecture description.
    #[error("Invalid architecture: {0}")]
    InvalidConfig(String),

    /// No such parameter.
    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    /// Replacement tensor has the wrong shape.
    #[error("Parameter {param} expects shape {expected:?}, got {got:?}")]
    ParamShape {
        /// Parameter name or path.
        param: String,
        /// Current shape.
        expected: Vec<usize>,
        /// Supplied shape.
        got: Vec<usize>,
    },
}

impl From<GraphError> for BcdError {
    fn from(err: GraphError) -> Self {
        BcdError::computation(err.to_string())
    }
}

/// Output of a node: feature maps or feature vectors.
#[derive(Debug, Clone)]
pub enum Activation<B: Backend> {
    /// `(N, C, H, W)` feature maps.
    Spatial(Tensor<B, 4>),
    /// `(N, F)` features.
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Activation<B> {
    /// Tensor dimensions.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Spatial(t) => t.dims().to_vec(),
            Self::Flat(t) => t.dims().to_vec(),
        }
    }

    /// The feature maps, if spatial.
    pub fn into_spatial(self) -> Option<Tensor<B, 4>> {
        match self {
            Self::Spatial(t) => Some(t),
            Self::Flat(_) => None,
        }
    }

    /// The features, if flat.
    pub fn into_flat(self) -> Option<Tensor<B, 2>> {
        match self {
            Self::Flat(t) => Some(t),
            Self::Spatial(_) => None,
        }
    }

    /// Cut the autodiff graph and mark the result as a gradient leaf.
    pub fn into_leaf(self) -> Self {
        match self {
            Self::Spatial(t) => Self::Spatial(t.detach().require_grad()),
            Self::Flat(t) => Self::Flat(t.detach().require_grad()),
        }
    }

    fn spatial(self, node: &str) -> Result<Tensor<B, 4>, GraphError> {
        let dims = self.dims();
        self.into_spatial().ok_or_else(|| GraphError::Shape {
            node: node.to_string(),
            detail: format!("expected (N, C, H, W) feature maps, got {dims:?}"),
        })
    }

    fn flat(self, node: &str) -> Result<Tensor<B, 2>, GraphError> {
        let dims = self.dims();
        self.into_flat().ok_or_else(|| GraphError::Shape {
            node: node.to_string(),
            detail: format!("expected (N, F) features, got {dims:?}"),
        })
    }
}

/// Operation applied by a node.
#[derive(Debug, Clone)]
pub enum Op<B: Backend> {
    /// Graph input placeholder.
    Input,
    /// Caffe-style channel flip and mean subtraction.
    Normalize(CaffeNormalize),
    /// 2D convolution.
    Conv2d(Conv2dLayer<B>),
    /// Batch normalization.
    BatchNorm(BatchNormLayer<B>),
    /// Rectified linear unit.
    Relu,
    /// Max pooling.
    MaxPool2d(MaxPool2dSpec),
    /// Elementwise sum of two inputs.
    Add,
    /// Spatial mean, `(N, C, H, W)` → `(N, C)`.
    GlobalAvgPool,
    /// Fully connected layer.
    Dense(DenseLayer<B>),
    /// Dropout; identity at inference.
    Dropout(f64),
    /// A nested graph evaluated as one step.
    Model(Box<Graph<B>>),
}

impl<B: Backend> Op<B> {
    /// Short kind name for logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Normalize(_) => "Normalize",
            Self::Conv2d(_) => "Conv2d",
            Self::BatchNorm(_) => "BatchNorm",
            Self::Relu => "Relu",
            Self::MaxPool2d(_) => "MaxPool2d",
            Self::Add => "Add",
            Self::GlobalAvgPool => "GlobalAvgPool",
            Self::Dense(_) => "Dense",
            Self::Dropout(_) => "Dropout",
            Self::Model(_) => "Model",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Input => 0,
            Self::Add => 2,
            _ => 1,
        }
    }

    fn params(&self) -> Option<&dyn ParamLayer<B>> {
        match self {
            Self::Conv2d(layer) => Some(layer),
            Self::BatchNorm(layer) => Some(layer),
            Self::Dense(layer) => Some(layer),
            _ => None,
        }
    }

    fn params_mut(&mut self) -> Option<&mut dyn ParamLayer<B>> {
        match self {
            Self::Conv2d(layer) => Some(layer),
            Self::BatchNorm(layer) => Some(layer),
            Self::Dense(layer) => Some(layer),
            _ => None,
        }
    }
}

/// A named node.
#[derive(Debug, Clone)]
pub struct Node<B: Backend> {
    name: String,
    op: Op<B>,
    inputs: Vec<NodeId>,
}

impl<B: Backend> Node<B> {
    /// Node name, unique within its graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operation.
    pub fn op(&self) -> &Op<B> {
        &self.op
    }

    /// Ids of the input nodes.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }
}

/// A directed acyclic graph of named nodes.
#[derive(Debug, Clone)]
pub struct Graph<B: Backend> {
    name: String,
    nodes: Vec<Node<B>>,
    index: HashMap<String, NodeId>,
    output: Option<NodeId>,
}

impl<B: Backend> Graph<B> {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            output: None,
        }
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in evaluation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<B>> {
        self.nodes.iter()
    }

    /// Append a node. Inputs must already exist, which keeps the graph
    /// topologically ordered.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name, an unknown input, a wrong input count or
    /// a second [`Op::Input`].
    pub fn add(
        &mut self,
        name: impl Into<String>,
        op: Op<B>,
        inputs: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        if inputs.len() != op.arity() {
            return Err(GraphError::Arity {
                node: name,
                expected: op.arity(),
                got: inputs.len(),
            });
        }
        if let Some(bad) = inputs.iter().find(|&&id| id >= self.nodes.len()) {
            return Err(GraphError::UnknownNode(format!("#{bad} (input of {name})")));
        }
        if matches!(op, Op::Input) && self.nodes.iter().any(|n| matches!(n.op, Op::Input)) {
            return Err(GraphError::InvalidConfig(format!(
                "graph {} already has an input node",
                self.name
            )));
        }

        let id = self.nodes.len();
        self.index.insert(name.clone(), id);
        self.nodes.push(Node {
            name,
            op,
            inputs: inputs.to_vec(),
        });
        Ok(id)
    }

    /// Designate the output node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] for an out-of-range id.
    pub fn set_output(&mut self, id: NodeId) -> Result<(), GraphError> {
        if id >= self.nodes.len() {
            return Err(GraphError::UnknownNode(format!("#{id}")));
        }
        self.output = Some(id);
        Ok(())
    }

    /// The output node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NoOutput`] if none was set.
    pub fn output(&self) -> Result<&Node<B>, GraphError> {
        self.output
            .map(|id| &self.nodes[id])
            .ok_or_else(|| GraphError::NoOutput(self.name.clone()))
    }

    /// Look up a node id by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node<B>> {
        self.node_id(name).map(|id| &self.nodes[id])
    }

    /// The nested graph held by node `name`, if it is an [`Op::Model`].
    pub fn sub_graph(&self, name: &str) -> Option<&Graph<B>> {
        match self.node(name).map(Node::op) {
            Some(Op::Model(graph)) => Some(graph),
            _ => None,
        }
    }

    /// Evaluate the graph on `input`.
    ///
    /// # Errors
    ///
    /// Fails if the graph has no output or an op receives a tensor of the
    /// wrong rank or size.
    pub fn forward(&self, input: Activation<B>) -> Result<Activation<B>, GraphError> {
        self.run(input, &mut |_, value| value)
    }

    /// Evaluate the graph, turning the activation of node `tap` into a
    /// gradient leaf on the way.
    ///
    /// Returns `(leaf, output)`: the output is computed from the leaf, so
    /// gradients of the output with respect to the tapped activation can be
    /// read from the leaf after `backward`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `tap` is not a node of this
    /// graph, plus any [`Graph::forward`] error.
    pub fn forward_tapped(
        &self,
        input: Activation<B>,
        tap: &str,
    ) -> Result<(Activation<B>, Activation<B>), GraphError> {
        if self.node_id(tap).is_none() {
            return Err(GraphError::UnknownNode(format!("{tap} in {}", self.name)));
        }
        let mut leaf = None;
        let output = self.run(input, &mut |node, value| {
            if node.name == tap {
                let tapped = value.into_leaf();
                leaf = Some(tapped.clone());
                tapped
            } else {
                value
            }
        })?;
        let leaf = leaf.ok_or_else(|| GraphError::UnknownNode(format!("{tap} (not reached)")))?;
        Ok((leaf, output))
    }

    fn run(
        &self,
        input: Activation<B>,
        hook: &mut dyn FnMut(&Node<B>, Activation<B>) -> Activation<B>,
    ) -> Result<Activation<B>, GraphError> {
        let output = self
            .output
            .ok_or_else(|| GraphError::NoOutput(self.name.clone()))?;

        // Last consumer of each node, so activations are freed as soon as
        // nothing downstream needs them.
        let mut last_use: Vec<Option<NodeId>> = vec![None; output + 1];
        for (id, node) in self.nodes.iter().enumerate().take(output + 1) {
            for &input_id in &node.inputs {
                last_use[input_id] = Some(id);
            }
        }

        let mut values: Vec<Option<Activation<B>>> = (0..=output).map(|_| None).collect();
        let mut input = Some(input);

        for (id, node) in self.nodes.iter().enumerate().take(output + 1) {
            let mut args = Vec::with_capacity(node.inputs.len());
            for &input_id in &node.inputs {
                let value = values[input_id].clone().ok_or_else(|| {
                    GraphError::UnknownNode(format!("{} (no value for #{input_id})", node.name))
                })?;
                args.push(value);
            }

            let value = self.eval(node, args, &mut input)?;
            values[id] = Some(hook(node, value));

            for &input_id in &node.inputs {
                if last_use[input_id] == Some(id) && input_id != output {
                    values[input_id] = None;
                }
            }
        }

        values[output]
            .take()
            .ok_or_else(|| GraphError::NoOutput(self.name.clone()))
    }

    fn eval(
        &self,
        node: &Node<B>,
        mut args: Vec<Activation<B>>,
        input: &mut Option<Activation<B>>,
    ) -> Result<Activation<B>, GraphError> {
        let name = node.name.as_str();
        if let Op::Input = node.op {
            return input.take().ok_or_else(|| GraphError::Shape {
                node: name.to_string(),
                detail: "graph input consumed twice".to_string(),
            });
        }
        if node.op.arity() == 1 {
            let x = args.remove(0);
            return match &node.op {
                Op::Normalize(norm) => Ok(Activation::Spatial(norm.apply(x.spatial(name)?)?)),
                Op::Conv2d(conv) => Ok(Activation::Spatial(conv.forward(x.spatial(name)?))),
                Op::BatchNorm(bn) => Ok(Activation::Spatial(bn.forward(x.spatial(name)?))),
                Op::Relu => Ok(match x {
                    Activation::Spatial(t) => Activation::Spatial(relu(t)),
                    Activation::Flat(t) => Activation::Flat(relu(t)),
                }),
                Op::MaxPool2d(pool) => Ok(Activation::Spatial(max_pool2d(
                    x.spatial(name)?,
                    pool.kernel,
                    pool.stride,
                    pool.padding,
                    [1, 1],
                ))),
                Op::GlobalAvgPool => {
                    let t = x.spatial(name)?;
                    let [n, c, _, _] = t.dims();
                    Ok(Activation::Flat(t.mean_dim(3).mean_dim(2).reshape([n, c])))
                }
                Op::Dense(dense) => Ok(Activation::Flat(dense.forward(x.flat(name)?))),
                Op::Dropout(_) => Ok(x),
                Op::Model(graph) => graph.forward(x),
                Op::Input | Op::Add => unreachable!("arity checked above"),
            };
        }

        // Add
        let b = args.pop();
        let a = args.pop();
        match (a, b) {
            (Some(a), Some(b)) if a.dims() == b.dims() => Ok(match (a, b) {
                (Activation::Spatial(a), Activation::Spatial(b)) => Activation::Spatial(a + b),
                (Activation::Flat(a), Activation::Flat(b)) => Activation::Flat(a + b),
                _ => unreachable!("equal dims imply equal rank"),
            }),
            (Some(a), Some(b)) => Err(GraphError::Shape {
                node: name.to_string(),
                detail: format!("cannot add {:?} and {:?}", a.dims(), b.dims()),
            }),
            _ => Err(GraphError::Arity {
                node: name.to_string(),
                expected: 2,
                got: 0,
            }),
        }
    }

    /// Parameter shapes grouped by top-level layer.
    ///
    /// Layers without parameters are omitted. A nested model contributes one
    /// entry holding every parameter of its sub-graph, keyed by
    /// `node/param` paths.
    pub fn param_shapes(&self) -> ParamShapes {
        let mut layers = ParamShapes::new();
        for node in &self.nodes {
            let mut params = BTreeMap::new();
            match &node.op {
                Op::Model(graph) => graph.collect_paths("", &mut params),
                op => {
                    if let Some(layer) = op.params() {
                        for spec in layer.param_specs() {
                            params.insert(spec.name.to_string(), spec.shape);
                        }
                    }
                }
            }
            if !params.is_empty() {
                layers.insert(node.name.clone(), params);
            }
        }
        layers
    }

    fn collect_paths(&self, prefix: &str, out: &mut BTreeMap<String, Vec<usize>>) {
        for node in &self.nodes {
            match &node.op {
                Op::Model(graph) => graph.collect_paths(&format!("{prefix}{}/", node.name), out),
                op => {
                    if let Some(layer) = op.params() {
                        for spec in layer.param_specs() {
                            out.insert(format!("{prefix}{}/{}", node.name, spec.name), spec.shape);
                        }
                    }
                }
            }
        }
    }

    /// Read the parameter at `path`.
    pub fn param(&self, path: &str) -> Option<TensorData> {
        let (head, rest) = path.split_once('/')?;
        match &self.node(head)?.op {
            Op::Model(graph) => graph.param(rest),
            op => op.params()?.param(rest),
        }
    }

    /// Replace the parameter at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownParam`] if the path does not resolve, or
    /// [`GraphError::ParamShape`] if the shape differs.
    pub fn set_param(&mut self, path: &str, data: TensorData) -> Result<(), GraphError> {
        let unknown = || GraphError::UnknownParam(path.to_string());
        let (head, rest) = path.split_once('/').ok_or_else(unknown)?;
        let id = self.node_id(head).ok_or_else(unknown)?;
        match &mut self.nodes[id].op {
            Op::Model(graph) => graph.set_param(rest, data),
            op => op
                .params_mut()
                .ok_or_else(unknown)?
                .set_param(rest, data)
                .map_err(|err| match err {
                    GraphError::ParamShape { expected, got, .. } => GraphError::ParamShape {
                        param: path.to_string(),
                        expected,
                        got,
                    },
                    GraphError::UnknownParam(_) => unknown(),
                    other => other,
                }),
        }
    }

    /// Sum of every parameter value of top-level layer `layer`.
    ///
    /// Returns `None` if the layer does not exist or has no parameters.
    pub fn checksum(&self, layer: &str) -> Option<f64> {
        let shapes = self.param_shapes();
        let params = shapes.get(layer)?;
        let mut sum = 0.0f64;
        for path in params.keys() {
            let data = self.param(&format!("{layer}/{path}"))?;
            let values: Vec<f32> = data.to_vec().ok()?;
            sum += values.iter().map(|&v| f64::from(v)).sum::<f64>();
        }
        Some(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::DenseActivation;
    use bcd_core::backend::{InferenceBackend, NdArray};
    use bcd_core::Seed;

    type TestBackend = NdArray;

    fn small_graph<B: Backend>(device: &B::Device) -> Graph<B> {
        let mut rng = Seed::new(5).to_rng();
        let mut graph = Graph::new("small");
        let input = graph.add("input", Op::Input, &[]).unwrap();
        let conv = graph
            .add(
                "conv",
                Op::Conv2d(Conv2dLayer::new(3, 4, [3, 3], [1, 1], [1, 1], true, &mut rng, device)),
                &[input],
            )
            .unwrap();
        let relu = graph.add("relu", Op::Relu, &[conv]).unwrap();
        let skip = graph
            .add(
                "skip",
                Op::Conv2d(Conv2dLayer::new(3, 4, [1, 1], [1, 1], [0, 0], false, &mut rng, device)),
                &[input],
            )
            .unwrap();
        let add = graph.add("add", Op::Add, &[relu, skip]).unwrap();
        let pool = graph.add("pool", Op::GlobalAvgPool, &[add]).unwrap();
        let dense = graph
            .add(
                "dense",
                Op::Dense(DenseLayer::new(4, 2, DenseActivation::Softmax, &mut rng, device)),
                &[pool],
            )
            .unwrap();
        graph.set_output(dense).unwrap();
        graph
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let graph = small_graph::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
        let out = graph.forward(Activation::Spatial(x)).unwrap();
        assert_eq!(out.dims(), vec![2, 2]);
    }

    #[test]
    fn test_add_rejects_bad_input() {
        let device = Default::default();
        let mut graph = small_graph::<TestBackend>(&device);
        assert!(matches!(
            graph.add("conv", Op::Relu, &[0]),
            Err(GraphError::DuplicateNode(_))
        ));
        assert!(matches!(
            graph.add("sum", Op::Add, &[0]),
            Err(GraphError::Arity { .. })
        ));
        assert!(matches!(
            graph.add("late", Op::Relu, &[99]),
            Err(GraphError::UnknownNode(_))
        ));
        assert!(graph.add("input2", Op::Input, &[]).is_err());
    }

    #[test]
    fn test_flat_input_to_conv_is_shape_error() {
        let device = Default::default();
        let graph = small_graph::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        assert!(matches!(
            graph.forward(Activation::Flat(x)),
            Err(GraphError::Shape { .. })
        ));
    }

    #[test]
    fn test_missing_output() {
        let mut graph = Graph::<TestBackend>::new("empty");
        graph.add("input", Op::Input, &[]).unwrap();
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 3, 2, 2], &device);
        assert!(matches!(
            graph.forward(Activation::Spatial(x)),
            Err(GraphError::NoOutput(_))
        ));
    }

    #[test]
    fn test_nested_param_paths() {
        let device = Default::default();
        let inner = small_graph::<TestBackend>(&device);
        let mut outer = Graph::new("outer");
        let input = outer.add("input", Op::Input, &[]).unwrap();
        let model = outer
            .add("small", Op::Model(Box::new(inner)), &[input])
            .unwrap();
        outer.set_output(model).unwrap();

        let shapes = outer.param_shapes();
        assert_eq!(shapes.len(), 1);
        let small = &shapes["small"];
        assert_eq!(small["conv/kernel"], vec![4, 3, 3, 3]);
        assert_eq!(small["dense/bias"], vec![2]);
        assert!(!small.contains_key("skip/bias"));

        outer
            .set_param("small/dense/bias", TensorData::new(vec![1.0f32, 2.0], [2]))
            .unwrap();
        let bias: Vec<f32> = outer.param("small/dense/bias").unwrap().to_vec().unwrap();
        assert_eq!(bias, vec![1.0, 2.0]);

        let err = outer
            .set_param("small/dense/bias", TensorData::new(vec![1.0f32], [1]))
            .unwrap_err();
        assert!(matches!(err, GraphError::ParamShape { .. }));
        assert!(outer
            .set_param("small/relu/kernel", TensorData::new(vec![1.0f32], [1]))
            .is_err());
        assert!(outer.sub_graph("small").is_some());
        assert!(outer.sub_graph("input").is_none());
    }

    #[test]
    fn test_checksum_tracks_params() {
        let device = Default::default();
        let mut graph = small_graph::<TestBackend>(&device);
        assert!(graph.checksum("relu").is_none());

        graph
            .set_param("dense/kernel", TensorData::new(vec![0.5f32; 8], [4, 2]))
            .unwrap();
        graph
            .set_param("dense/bias", TensorData::new(vec![1.0f32, -3.0], [2]))
            .unwrap();
        let sum = graph.checksum("dense").unwrap();
        assert!((sum - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_forward_tapped_yields_gradients() {
        let device = Default::default();
        let graph = small_graph::<InferenceBackend>(&device);
        let x = Tensor::<InferenceBackend, 4>::ones([1, 3, 6, 6], &device);

        let (leaf, output) = graph.forward_tapped(Activation::Spatial(x), "add").unwrap();
        let leaf = leaf.into_spatial().unwrap();
        assert_eq!(leaf.dims(), [1, 4, 6, 6]);

        let score = output.into_flat().unwrap().max();
        let grads = score.backward();
        let grad = leaf.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [1, 4, 6, 6]);

        assert!(graph
            .forward_tapped(
                Activation::Spatial(Tensor::ones([1, 3, 6, 6], &device)),
                "nope"
            )
            .is_err());
    }
}
