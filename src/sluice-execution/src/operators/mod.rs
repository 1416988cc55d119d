//! Physical operators.
//!
//! Every stage implements [`PhysicalOperator`]; concrete stages are chosen
//! when the plan is built and driven through the same contract.
//!
//! | Operator | Inputs | Launches work |
//! |----------|--------|---------------|
//! | `InputDataBuffer` | 0 | No |
//! | `TaskPoolMapOperator` | 1 | One task per input |
//! | `ActorPoolMapOperator` | 1 | Tasks on a fixed actor pool |
//! | `UnionOperator` | N | No |

mod actor_pool_map;
mod input_buffer;
mod task_pool_map;
mod traits;
mod union;

use std::collections::HashSet;
use std::sync::Arc;

use common_display::{DisplayTree, TreeNode};

pub use traits::{
    ActorPoolInfo, BoxedPhysicalOperator, OperatorBase, OperatorState, PhysicalOperator,
    TaskRegistry,
};

pub use actor_pool_map::ActorPoolMapOperator;
pub use input_buffer::InputDataBuffer;
pub use task_pool_map::TaskPoolMapOperator;
pub use union::UnionOperator;

/// Every operator reachable upstream of `root`, inputs before consumers.
///
/// Operators shared by several consumers appear once.
pub fn post_order(root: &Arc<dyn PhysicalOperator>) -> Vec<Arc<dyn PhysicalOperator>> {
    fn visit(
        op: &Arc<dyn PhysicalOperator>,
        seen: &mut HashSet<String>,
        out: &mut Vec<Arc<dyn PhysicalOperator>>,
    ) {
        if !seen.insert(op.id().to_string()) {
            return;
        }
        for input in op.input_dependencies() {
            visit(input, seen, out);
        }
        out.push(Arc::clone(op));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(root, &mut seen, &mut out);
    out
}

struct ExplainNode {
    label: String,
    details: Option<String>,
    children: Vec<ExplainNode>,
}

impl ExplainNode {
    fn build(op: &dyn PhysicalOperator) -> Self {
        let progress = op.progress_str();
        Self {
            label: op.display(),
            details: (!progress.is_empty()).then_some(progress),
            children: op
                .input_dependencies()
                .iter()
                .map(|input| Self::build(input.as_ref()))
                .collect(),
        }
    }
}

impl TreeNode for ExplainNode {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn children(&self) -> Vec<&dyn TreeNode> {
        self.children.iter().map(|c| c as &dyn TreeNode).collect()
    }

    fn details(&self) -> Option<String> {
        self.details.clone()
    }
}

/// Render the operator tree rooted at `root`, one line per operator.
pub fn explain(root: &dyn PhysicalOperator) -> String {
    DisplayTree::new(&ExplainNode::build(root)).to_string()
}
