use crate::array::{DataType, Order};

/// Settings threaded explicitly through every executor and graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    /// Element type of arrays the engine creates on its own (gradient seeds,
    /// zero gradients).
    pub default_dtype: DataType,
    /// Ordering of freshly allocated outputs.
    pub default_order: Order,
    /// Segment length for reductions. Each segment is folded from the zero
    /// element and the partials are merged with `combine_sub_results`.
    pub reduction_block: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        ExecutionContext {
            default_dtype: DataType::Float,
            default_order: Order::C,
            reduction_block: 1024,
        }
    }
}

impl ExecutionContext {
    pub fn new(default_dtype: DataType) -> Self {
        ExecutionContext {
            default_dtype,
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.default_order = order;
        self
    }

    pub fn with_reduction_block(mut self, block: usize) -> Self {
        self.reduction_block = block.max(1);
        self
    }
}
