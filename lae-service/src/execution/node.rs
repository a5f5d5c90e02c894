// Computation Tree
// Owned expression tree over matrices, reduced one resolvable node at a time

use crate::memory::MatrixData;

use std::fmt;

/// Operators the engine knows how to fan out into row tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Multiply,
    Negate,
    Transpose,
}

impl Operator {
    /// Symbol used in JSON input
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Multiply => "*",
            Operator::Negate => "-",
            Operator::Transpose => "T",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Operator::Add),
            "*" => Some(Operator::Multiply),
            "-" => Some(Operator::Negate),
            "T" => Some(Operator::Transpose),
            _ => None,
        }
    }

    /// Whether n-ary chains of this operator may be regrouped
    pub fn is_associative(&self) -> bool {
        matches!(self, Operator::Add | Operator::Multiply)
    }

    /// Number of operands a single application takes
    pub fn arity(&self) -> usize {
        match self {
            Operator::Add | Operator::Multiply => 2,
            Operator::Negate | Operator::Transpose => 1,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Operator::Add => NodeType::Add,
            Operator::Multiply => NodeType::Multiply,
            Operator::Negate => NodeType::Negate,
            Operator::Transpose => NodeType::Transpose,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Add => "add",
            Operator::Multiply => "multiply",
            Operator::Negate => "negate",
            Operator::Transpose => "transpose",
        };
        write!(f, "{}", name)
    }
}

/// Tag of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Matrix,
    Add,
    Multiply,
    Negate,
    Transpose,
}

/// A node of the expression tree: a concrete matrix or an operator applied
/// to child nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputationNode {
    Matrix(MatrixData),
    Operation {
        operator: Operator,
        operands: Vec<ComputationNode>,
    },
}

impl ComputationNode {
    pub fn matrix(data: MatrixData) -> Self {
        ComputationNode::Matrix(data)
    }

    pub fn operation(operator: Operator, operands: Vec<ComputationNode>) -> Self {
        ComputationNode::Operation { operator, operands }
    }

    pub fn add(left: ComputationNode, right: ComputationNode) -> Self {
        Self::operation(Operator::Add, vec![left, right])
    }

    pub fn multiply(left: ComputationNode, right: ComputationNode) -> Self {
        Self::operation(Operator::Multiply, vec![left, right])
    }

    pub fn negate(operand: ComputationNode) -> Self {
        Self::operation(Operator::Negate, vec![operand])
    }

    pub fn transpose(operand: ComputationNode) -> Self {
        Self::operation(Operator::Transpose, vec![operand])
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            ComputationNode::Matrix(_) => NodeType::Matrix,
            ComputationNode::Operation { operator, .. } => operator.node_type(),
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, ComputationNode::Matrix(_))
    }

    /// Concrete payload, if this node is a matrix
    pub fn as_matrix(&self) -> Option<&MatrixData> {
        match self {
            ComputationNode::Matrix(data) => Some(data),
            ComputationNode::Operation { .. } => None,
        }
    }

    pub fn into_matrix(self) -> Option<MatrixData> {
        match self {
            ComputationNode::Matrix(data) => Some(data),
            ComputationNode::Operation { .. } => None,
        }
    }

    /// Child nodes; empty for a matrix
    pub fn operands(&self) -> &[ComputationNode] {
        match self {
            ComputationNode::Matrix(_) => &[],
            ComputationNode::Operation { operands, .. } => operands,
        }
    }

    /// Regroup n-ary associative chains into left-nested binary nodes.
    ///
    /// `+(a, b, c, d)` becomes `+(+(+(a, b), c), d)`. Applied to the whole
    /// subtree.
    pub fn associative_nesting(&mut self) {
        let ComputationNode::Operation { operator, operands } = self else {
            return;
        };
        for operand in operands.iter_mut() {
            operand.associative_nesting();
        }
        if !operator.is_associative() || operands.len() <= 2 {
            return;
        }

        let operator = *operator;
        let rest = operands.split_off(2);
        let mut nested = ComputationNode::operation(operator, std::mem::take(operands));
        for operand in rest {
            nested = ComputationNode::operation(operator, vec![nested, operand]);
        }
        *self = nested;
    }

    /// Whether every operand is already a concrete matrix
    pub fn is_resolvable(&self) -> bool {
        match self {
            ComputationNode::Matrix(_) => false,
            ComputationNode::Operation { operands, .. } => operands.iter().all(Self::is_matrix),
        }
    }

    /// First resolvable node in a left-to-right, bottom-up walk
    pub fn find_resolvable(&mut self) -> Option<&mut ComputationNode> {
        if self.is_resolvable() {
            return Some(self);
        }
        match self {
            ComputationNode::Matrix(_) => None,
            ComputationNode::Operation { operands, .. } => {
                operands.iter_mut().find_map(|operand| operand.find_resolvable())
            }
        }
    }

    /// Replace this node with a concrete matrix leaf
    pub fn resolve(&mut self, data: MatrixData) {
        *self = ComputationNode::Matrix(data);
    }

    /// Number of operator nodes left in the tree
    pub fn count_operations(&self) -> usize {
        match self {
            ComputationNode::Matrix(_) => 0,
            ComputationNode::Operation { operands, .. } => {
                1 + operands.iter().map(Self::count_operations).sum::<usize>()
            }
        }
    }

    /// Deepest operator nesting; a matrix has depth zero
    pub fn depth(&self) -> usize {
        match self {
            ComputationNode::Matrix(_) => 0,
            ComputationNode::Operation { operands, .. } => {
                1 + operands.iter().map(Self::depth).max().unwrap_or(0)
            }
        }
    }
}
