//! Differentiable function graph.
//!
//! Nodes live in an arena owned by the [`Graph`] and refer to their
//! arguments by index, so a node may feed any number of consumers without
//! shared ownership. Arguments always precede their consumers, which makes
//! ascending node index a topological order.
//!
//! Node lifecycle: a [`PendingFunction`] is Unbound; [`Graph::bind`] validates
//! its arguments and turns it into a Bound node; [`Graph::do_diff`] caches the
//! node's gradient contributions and moves it to Differentiated. Nothing ever
//! returns to Unbound.

pub mod diff;
mod functions;

use crate::array::{NDArray, Value};
use crate::context::ExecutionContext;
use crate::error::Error;
use crate::executor::OpExecutor;
use crate::meta::{MetaOperation, OpDescriptor};
use crate::ops::{Arity, DiffRule, OpArgs, OpDef, OpKind, Operation, TransformMath};
use crate::registry;
use crate::util::{broadcast_shapes, reduced_shape, validate_dimensions};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(1);

/// Handle to a node: the owning graph's id plus the node's arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    graph: usize,
    index: usize,
}

impl NodeRef {
    pub fn id(&self) -> usize {
        self.index
    }

    pub fn graph_id(&self) -> usize {
        self.graph
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Bound,
    Differentiated,
}

/// An op together with its non-array arguments.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub def: &'static OpDef,
    pub scalar: Option<Value>,
    pub extra_args: Vec<f64>,
    pub int_args: Vec<i64>,
    pub dimensions: Vec<usize>,
}

impl FunctionCall {
    fn new(def: &'static OpDef) -> Self {
        FunctionCall {
            def,
            scalar: None,
            extra_args: def.default_args.to_vec(),
            int_args: Vec::new(),
            dimensions: Vec::new(),
        }
    }

    pub fn op_args(&self) -> OpArgs<'_> {
        OpArgs {
            extra: &self.extra_args,
            ints: &self.int_args,
            dims: &self.dimensions,
        }
    }

    /// The executable operation over already computed inputs.
    fn operation(&self, inputs: &[NDArray]) -> Result<Operation, Error> {
        let x = inputs
            .first()
            .cloned()
            .ok_or_else(|| Error::InternalLogicError(format!("{} has no inputs", self.def.name)))?;
        let mut op = Operation::from_def(self.def, x)
            .with_extra_args(self.extra_args.clone())
            .with_int_args(self.int_args.clone())
            .along(&self.dimensions);
        if let Some(y) = inputs.get(1) {
            op = op.with_y(y.clone());
        }
        if let Some(s) = self.scalar {
            op = op.with_scalar(s);
        }
        Ok(op)
    }

    fn descriptor(&self) -> OpDescriptor {
        OpDescriptor {
            def: self.def,
            scalar: self.scalar,
            extra_args: self.extra_args.clone(),
            dimensions: self.dimensions.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Named input. `value` is `None` for an unbound placeholder.
    Variable { value: Option<NDArray> },
    Constant { value: NDArray },
    Function(FunctionCall),
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    shape: Vec<usize>,
    kind: NodeKind,
    args: Vec<usize>,
    state: NodeState,
    /// `(incoming gradient index, contributions)` from the last `do_diff`.
    diff_cache: Option<(usize, Vec<usize>)>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn op_name(&self) -> Option<&'static str> {
        match &self.kind {
            NodeKind::Function(call) => Some(call.def.name),
            _ => None,
        }
    }
}

/// A function node that has not been added to any graph yet.
#[derive(Debug, Clone)]
pub struct PendingFunction {
    call: FunctionCall,
    args: Vec<NodeRef>,
}

impl PendingFunction {
    /// # Errors
    /// `UnknownOp` if `name` is not registered.
    pub fn new(name: &str, args: &[NodeRef]) -> Result<Self, Error> {
        Ok(PendingFunction {
            call: FunctionCall::new(registry::lookup(name)?),
            args: args.to_vec(),
        })
    }

    pub fn with_scalar(mut self, scalar: impl Into<Value>) -> Self {
        self.call.scalar = Some(scalar.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<f64>) -> Self {
        self.call.extra_args = args;
        self
    }

    pub fn with_int_args(mut self, args: Vec<i64>) -> Self {
        self.call.int_args = args;
        self
    }

    pub fn along(mut self, dims: &[usize]) -> Self {
        self.call.dimensions = dims.to_vec();
        self
    }
}

/// What a derivative rule sees for one node.
#[derive(Debug, Clone)]
pub struct DiffInput {
    pub node: NodeRef,
    pub args: Vec<NodeRef>,
    pub call: FunctionCall,
    /// Accumulated gradient flowing into the node's output.
    pub grad: NodeRef,
}

/// Local gradient rule: returns one contribution per argument, in order,
/// built from other graph nodes.
pub type DiffFn = fn(&mut Graph, &DiffInput) -> Result<Vec<NodeRef>, Error>;

#[derive(Debug)]
pub struct Graph {
    id: usize,
    nodes: Vec<Node>,
    variables: HashMap<String, usize>,
    executor: OpExecutor,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(ctx: ExecutionContext) -> Self {
        Graph {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            variables: HashMap::new(),
            executor: OpExecutor::new(ctx),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn context(&self) -> &ExecutionContext {
        self.executor.context()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_ref(&self, index: usize) -> NodeRef {
        NodeRef {
            graph: self.id,
            index,
        }
    }

    /// Rejects handles from other graphs.
    fn check(&self, node: NodeRef) -> Result<usize, Error> {
        if node.graph != self.id {
            return Err(Error::GraphMismatch {
                expected: self.id,
                actual: node.graph,
            });
        }
        if node.index >= self.nodes.len() {
            return Err(Error::IndexOutOfBounds {
                index: node.index,
                size: self.nodes.len(),
            });
        }
        Ok(node.index)
    }

    pub fn node(&self, node: NodeRef) -> Result<&Node, Error> {
        let i = self.check(node)?;
        Ok(&self.nodes[i])
    }

    pub fn shape(&self, node: NodeRef) -> Result<&[usize], Error> {
        Ok(self.node(node)?.shape())
    }

    pub fn state(&self, node: NodeRef) -> Result<NodeState, Error> {
        Ok(self.node(node)?.state)
    }

    /// Argument handles of `node`, in order.
    pub fn args(&self, node: NodeRef) -> Result<Vec<NodeRef>, Error> {
        Ok(self
            .node(node)?
            .args
            .iter()
            .map(|&a| self.node_ref(a))
            .collect())
    }

    fn push(&mut self, name: String, shape: Vec<usize>, kind: NodeKind, args: Vec<usize>) -> NodeRef {
        self.nodes.push(Node {
            name,
            shape,
            kind,
            args,
            state: NodeState::Bound,
            diff_cache: None,
        });
        self.node_ref(self.nodes.len() - 1)
    }

    fn add_variable(&mut self, name: &str, shape: Vec<usize>, value: Option<NDArray>) -> Result<NodeRef, Error> {
        if self.variables.contains_key(name) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }
        let node = self.push(name.to_string(), shape, NodeKind::Variable { value }, Vec::new());
        self.variables.insert(name.to_string(), node.index);
        Ok(node)
    }

    /// Variable holding `value`.
    pub fn var(&mut self, name: &str, value: NDArray) -> Result<NodeRef, Error> {
        let shape = value.shape().to_vec();
        self.add_variable(name, shape, Some(value))
    }

    /// Placeholder of fixed shape, to be bound with [`Graph::bind_array`]
    /// before execution.
    pub fn register_variable(&mut self, name: &str, shape: &[usize]) -> Result<NodeRef, Error> {
        self.add_variable(name, shape.to_vec(), None)
    }

    /// Binds (or rebinds) the value of a variable.
    ///
    /// # Errors
    /// `InvalidOperation` for an unknown name, `ShapeMismatch` when `array`
    /// does not have the registered shape.
    pub fn bind_array(&mut self, name: &str, array: NDArray) -> Result<(), Error> {
        let &i = self
            .variables
            .get(name)
            .ok_or_else(|| Error::InvalidOperation(format!("no variable named '{}'", name)))?;
        let node = &mut self.nodes[i];
        if node.shape.as_slice() != array.shape() {
            return Err(Error::shape_mismatch(&node.shape, array.shape()));
        }
        node.kind = NodeKind::Variable { value: Some(array) };
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<NodeRef> {
        self.variables.get(name).map(|&i| self.node_ref(i))
    }

    pub fn variables(&self) -> Vec<NodeRef> {
        let mut ids: Vec<usize> = self.variables.values().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|i| self.node_ref(i)).collect()
    }

    pub fn constant(&mut self, value: NDArray) -> NodeRef {
        let name = format!("const_{}", self.nodes.len());
        let shape = value.shape().to_vec();
        self.push(name, shape, NodeKind::Constant { value }, Vec::new())
    }

    /// Adds `name` applied to `inputs`. Empty `extra_args` keeps the op's
    /// defaults.
    pub fn register_operation(
        &mut self,
        name: &str,
        inputs: &[NodeRef],
        extra_args: &[f64],
    ) -> Result<NodeRef, Error> {
        let mut pending = PendingFunction::new(name, inputs)?;
        if !extra_args.is_empty() {
            pending = pending.with_extra_args(extra_args.to_vec());
        }
        self.bind(pending)
    }

    /// Validates a pending function against this graph and adds it.
    ///
    /// # Errors
    /// * `GraphMismatch` when an argument belongs to another graph.
    /// * `InvalidOperation` for a wrong argument count or missing scalar.
    /// * `ShapeMismatch` / `IncompatibleShapes` / `InvalidDimension` from shape
    ///   inference.
    pub fn bind(&mut self, pending: PendingFunction) -> Result<NodeRef, Error> {
        let PendingFunction { call, args } = pending;
        let indices = args
            .iter()
            .map(|&a| self.check(a))
            .collect::<Result<Vec<_>, Error>>()?;
        let expected = call.def.arity.inputs();
        if indices.len() != expected {
            return Err(Error::InvalidOperation(format!(
                "{} takes {} argument(s), got {}",
                call.def.name,
                expected,
                indices.len()
            )));
        }
        let shapes: Vec<Vec<usize>> = indices.iter().map(|&i| self.nodes[i].shape.clone()).collect();
        let shape = infer_shape(&call, &shapes)?;
        let name = format!("{}_{}", call.def.name, self.nodes.len());
        Ok(self.push(name, shape, NodeKind::Function(call), indices))
    }

    /// Gradient contributions of `node` given the gradient `grad` flowing
    /// into its output, one per argument in order. Cached per incoming
    /// gradient; the node becomes Differentiated.
    ///
    /// # Errors
    /// `DifferentiationError` for a non-differentiable op or a leaf node.
    pub fn do_diff(&mut self, node: NodeRef, grad: NodeRef) -> Result<Vec<NodeRef>, Error> {
        let i = self.check(node)?;
        let g = self.check(grad)?;
        if let Some((cached_grad, contributions)) = &self.nodes[i].diff_cache {
            if *cached_grad == g {
                return Ok(contributions.iter().map(|&c| self.node_ref(c)).collect());
            }
        }
        let call = match &self.nodes[i].kind {
            NodeKind::Function(call) => call.clone(),
            _ => {
                return Err(Error::DifferentiationError(format!(
                    "{} is a leaf and has no inputs to differentiate",
                    self.nodes[i].name
                )))
            }
        };
        let args: Vec<NodeRef> = self.nodes[i].args.iter().map(|&a| self.node_ref(a)).collect();
        let contributions = match call.def.diff {
            DiffRule::Rule(rule) => {
                let input = DiffInput {
                    node,
                    args: args.clone(),
                    call,
                    grad,
                };
                rule(self, &input)?
            }
            DiffRule::ZeroGradient => args
                .iter()
                .map(|&a| self.zeros_like(a))
                .collect::<Result<Vec<_>, Error>>()?,
            DiffRule::NotDifferentiable => {
                return Err(Error::DifferentiationError(format!(
                    "{} ({}) has no derivative",
                    self.nodes[i].name, call.def.name
                )))
            }
        };
        if contributions.len() != args.len() {
            return Err(Error::InternalLogicError(format!(
                "derivative of {} returned {} contributions for {} arguments",
                self.nodes[i].name,
                contributions.len(),
                args.len()
            )));
        }
        for (&arg, &c) in args.iter().zip(&contributions) {
            if self.shape(arg)? != self.shape(c)? {
                return Err(Error::InternalLogicError(format!(
                    "gradient for argument {} of {} has shape {:?}, expected {:?}",
                    arg.index,
                    self.nodes[i].name,
                    self.shape(c)?,
                    self.shape(arg)?
                )));
            }
        }
        let node_mut = &mut self.nodes[i];
        node_mut.diff_cache = Some((g, contributions.iter().map(|c| c.index).collect()));
        node_mut.state = NodeState::Differentiated;
        Ok(contributions)
    }

    /// Builds nodes computing `d target / d w` for every `w` in `wrt`, seeded
    /// with ones of `target`'s shape.
    ///
    /// Only nodes that both feed `target` and depend on some `w` are visited,
    /// in reverse topological order; contributions from several consumers are
    /// summed before a node's rule runs. A `w` with no path to `target`
    /// receives zeros.
    pub fn differentiate(&mut self, target: NodeRef, wrt: &[NodeRef]) -> Result<Vec<NodeRef>, Error> {
        let t = self.check(target)?;
        let wrt_idx = wrt
            .iter()
            .map(|&w| self.check(w))
            .collect::<Result<Vec<_>, Error>>()?;

        let feeds_target = self.ancestors(&[t]);
        let mut depends = vec![false; t + 1];
        for &w in &wrt_idx {
            if w <= t {
                depends[w] = true;
            }
        }
        for i in 0..=t {
            if self.nodes[i].args.iter().any(|&a| depends[a]) {
                depends[i] = true;
            }
        }

        let seed_shape = self.nodes[t].shape.clone();
        let dtype = self.context().default_dtype;
        let seed = self.constant(NDArray::ones(&seed_shape, dtype));
        let mut pending: HashMap<usize, Vec<NodeRef>> = HashMap::new();
        pending.insert(t, vec![seed]);
        let mut totals: HashMap<usize, NodeRef> = HashMap::new();

        for i in (0..=t).rev() {
            if !feeds_target[i] || !depends[i] {
                continue;
            }
            let Some(incoming) = pending.remove(&i) else {
                continue;
            };
            let total = self.sum_all(&incoming)?;
            totals.insert(i, total);

            let (def, args) = match &self.nodes[i].kind {
                NodeKind::Function(call) => (call.def, self.nodes[i].args.clone()),
                _ => continue,
            };
            if !args.iter().any(|&a| depends[a]) {
                continue;
            }
            crate::debug_println!("differentiate: {} ({})", self.nodes[i].name, def.name);
            match def.diff {
                DiffRule::ZeroGradient => continue,
                DiffRule::NotDifferentiable => {
                    return Err(Error::DifferentiationError(format!(
                        "gradient requested through non-differentiable op {} ({})",
                        def.name, self.nodes[i].name
                    )))
                }
                DiffRule::Rule(_) => {}
            }
            let contributions = self.do_diff(self.node_ref(i), total)?;
            for (&a, c) in args.iter().zip(contributions) {
                if depends[a] {
                    pending.entry(a).or_default().push(c);
                }
            }
        }

        let mut grads = Vec::with_capacity(wrt_idx.len());
        for w in wrt_idx {
            let grad = match totals.get(&w) {
                Some(&g) => g,
                None => {
                    let leaf = self.node_ref(w);
                    self.zeros_like(leaf)?
                }
            };
            grads.push(grad);
        }
        Ok(grads)
    }

    /// Adds up gradient contributions with `add` nodes.
    fn sum_all(&mut self, contributions: &[NodeRef]) -> Result<NodeRef, Error> {
        let (&first, rest) = contributions
            .split_first()
            .ok_or_else(|| Error::InternalLogicError("no gradient contributions".to_string()))?;
        rest.iter().try_fold(first, |acc, &c| self.add(acc, c))
    }

    /// `marks[i]` is true when node `i` is one of `roots` or feeds one.
    fn ancestors(&self, roots: &[usize]) -> Vec<bool> {
        let top = roots.iter().copied().max().map_or(0, |m| m + 1);
        let mut marks = vec![false; top];
        for &r in roots {
            marks[r] = true;
        }
        for i in (0..top).rev() {
            if marks[i] {
                for &a in &self.nodes[i].args {
                    marks[a] = true;
                }
            }
        }
        marks
    }

    /// Executes the subgraph needed for `node`.
    pub fn exec(&self, node: NodeRef) -> Result<NDArray, Error> {
        let mut out = self.exec_many(&[node])?;
        out.pop()
            .ok_or_else(|| Error::InternalLogicError("exec produced no output".to_string()))
    }

    /// Executes several nodes, evaluating shared subexpressions once.
    ///
    /// # Errors
    /// `UnboundPlaceholder` when a needed placeholder has no value.
    pub fn exec_many(&self, nodes: &[NodeRef]) -> Result<Vec<NDArray>, Error> {
        let roots = nodes
            .iter()
            .map(|&n| self.check(n))
            .collect::<Result<Vec<_>, Error>>()?;
        let needed = self.ancestors(&roots);
        let requested: HashSet<usize> = roots.iter().copied().collect();

        let mut consumers = vec![0usize; needed.len()];
        for (i, node) in self.nodes.iter().enumerate().take(needed.len()) {
            if needed[i] {
                for &a in &node.args {
                    consumers[a] += 1;
                }
            }
        }
        let fused = self.fusion_plan(&needed, &consumers, &requested);
        let folded: HashSet<usize> = fused.values().copied().collect();

        let mut values: HashMap<usize, NDArray> = HashMap::new();
        for i in 0..needed.len() {
            if !needed[i] || folded.contains(&i) {
                continue;
            }
            let value = match fused.get(&i) {
                Some(&producer) => self.exec_fused(producer, i, &values)?,
                None => self.eval(i, &values)?,
            };
            values.insert(i, value);
        }
        roots
            .iter()
            .map(|r| {
                values
                    .get(r)
                    .cloned()
                    .ok_or_else(|| Error::InternalLogicError(format!("node {} not evaluated", r)))
            })
            .collect()
    }

    /// Consumer nodes (keys) whose elementwise producer (values) can be
    /// folded into them.
    ///
    /// A consumer is a unary reduction or another elementwise op. Nodes are
    /// visited from the last one back so a reduction claims its producer
    /// before that producer could claim its own; a node is either folded or
    /// a fused consumer, never both.
    fn fusion_plan(
        &self,
        needed: &[bool],
        consumers: &[usize],
        requested: &HashSet<usize>,
    ) -> HashMap<usize, usize> {
        let mut plan = HashMap::new();
        let mut folded = HashSet::new();
        for i in (0..needed.len()).rev() {
            if !needed[i] || folded.contains(&i) {
                continue;
            }
            let node = &self.nodes[i];
            let NodeKind::Function(call) = &node.kind else {
                continue;
            };
            if !is_fusable_consumer(call) {
                continue;
            }
            let p = node.args[0];
            if consumers[p] != 1 || requested.contains(&p) {
                continue;
            }
            if let NodeKind::Function(producer) = &self.nodes[p].kind {
                if is_fusable_producer(producer) {
                    crate::debug_println!("fusing {} into {}", self.nodes[p].name, node.name);
                    plan.insert(i, p);
                    folded.insert(p);
                }
            }
        }
        plan
    }

    fn inputs_of(&self, i: usize, values: &HashMap<usize, NDArray>) -> Result<Vec<NDArray>, Error> {
        self.nodes[i]
            .args
            .iter()
            .map(|a| {
                values
                    .get(a)
                    .cloned()
                    .ok_or_else(|| Error::InternalLogicError(format!("argument {} not evaluated", a)))
            })
            .collect()
    }

    fn eval(&self, i: usize, values: &HashMap<usize, NDArray>) -> Result<NDArray, Error> {
        let node = &self.nodes[i];
        match &node.kind {
            NodeKind::Variable { value: Some(v) } => Ok(v.clone()),
            NodeKind::Variable { value: None } => Err(Error::UnboundPlaceholder(node.name.clone())),
            NodeKind::Constant { value } => Ok(value.clone()),
            NodeKind::Function(call) => {
                let inputs = self.inputs_of(i, values)?;
                let mut op = call.operation(&inputs)?;
                self.executor.exec(&mut op)
            }
        }
    }

    fn exec_fused(
        &self,
        producer: usize,
        consumer: usize,
        values: &HashMap<usize, NDArray>,
    ) -> Result<NDArray, Error> {
        let (NodeKind::Function(first), NodeKind::Function(second)) =
            (&self.nodes[producer].kind, &self.nodes[consumer].kind)
        else {
            return Err(Error::InternalLogicError("fused nodes must be functions".to_string()));
        };
        let inputs = self.inputs_of(producer, values)?;
        let meta = MetaOperation::fuse(first.operation(&inputs)?, second.descriptor())?;
        self.executor.exec_meta(&meta)
    }
}

fn is_fusable_consumer(call: &FunctionCall) -> bool {
    match call.def.kind {
        OpKind::Accumulation(_) => call.def.arity == Arity::Unary,
        // A complex scalar would promote a real intermediate.
        _ => is_fusable_producer(call) && !matches!(call.scalar, Some(Value::Complex(_))),
    }
}

fn is_fusable_producer(call: &FunctionCall) -> bool {
    if !call.dimensions.is_empty() {
        return false;
    }
    match call.def.kind {
        OpKind::Transform(TransformMath::Elementwise(_)) => call.def.arity == Arity::Unary,
        OpKind::Scalar(_) => call.scalar.is_some(),
        _ => false,
    }
}

/// Output shape of `call` applied to arguments of the given shapes.
fn infer_shape(call: &FunctionCall, shapes: &[Vec<usize>]) -> Result<Vec<usize>, Error> {
    let def = call.def;
    let x = &shapes[0];
    match &def.kind {
        OpKind::Transform(_) => {
            validate_dimensions(&call.dimensions, x.len())?;
            match def.arity {
                Arity::Unary => Ok(x.clone()),
                Arity::Binary => broadcast_shapes(x, &shapes[1]),
            }
        }
        OpKind::Scalar(_) => {
            validate_dimensions(&call.dimensions, x.len())?;
            if call.scalar.is_none() {
                return Err(Error::InvalidOperation(format!(
                    "{} in a graph needs a scalar",
                    def.name
                )));
            }
            Ok(x.clone())
        }
        OpKind::Accumulation(_) | OpKind::IndexAccumulation(_) => {
            let dims = validate_dimensions(&call.dimensions, x.len())?;
            if def.arity == Arity::Binary && broadcast_shapes(x, &shapes[1])? != *x {
                return Err(Error::shape_mismatch(x, &shapes[1]));
            }
            Ok(reduced_shape(x, &dims))
        }
        OpKind::Custom(math) => (math.shape)(shapes, &call.op_args()),
    }
}
