use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use lae_service::{ComputationNode, InputParser};

/// Validate a JSON expression file without evaluating it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the expression JSON file
    pub input: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let input_path = &args.input;

    if !input_path.exists() {
        color_eyre::eyre::bail!("Input file not found: {}", input_path.display());
    }

    output::action("Validating", &format!("{}", input_path.display()));

    let mut tree = match InputParser::parse_file(input_path) {
        Ok(tree) => tree,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };
    output::passed("JSON expression valid");

    let nodes = tree.count_operations();
    tree.associative_nesting();
    output::passed(&format!(
        "Structure: {} operation node(s), depth {}",
        nodes,
        tree.depth()
    ));
    output::passed(&format!(
        "{} reduction step(s) after nesting n-ary chains",
        tree.count_operations()
    ));

    let empty = empty_matrices(&tree);
    if empty > 0 {
        output::warn(&format!(
            "{} empty matrix operand(s); evaluation will fail",
            empty
        ));
    }

    println!();
    output::passed("Expression is valid");

    Ok(())
}

fn empty_matrices(node: &ComputationNode) -> usize {
    match node.as_matrix() {
        Some(data) => usize::from(data.first().map_or(true, Vec::is_empty)),
        None => node.operands().iter().map(empty_matrices).sum(),
    }
}
