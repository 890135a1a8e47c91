//! Subcommand handlers.

use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use nixconf::{
    Attribute, EditorConfig, OptionDefault, OptionDefinition, OptionTree, Session,
    tree::Change,
};

use crate::cli::SetArgs;

/// Print the children of `attribute` with their leaf counts, or the
/// elements of a list option with their values.
pub fn children(session: &Session, attribute: Option<&str>) -> Result<()> {
    let tree = load_tree(session)?;
    let attribute = match attribute {
        Some(text) => parse_attribute(text)?,
        None => Attribute::root(),
    };
    if !tree.contains(&attribute) {
        bail!("no option or branch named `{attribute}`");
    }

    for child in tree.children(&attribute) {
        if let Some((_, value)) = tree.get_element(&child) {
            println!("{:<48} {}", child.to_string().as_str().green(), value.to_string().as_str().dimmed());
            continue;
        }
        let count = tree.get_leaf_count(&child);
        match tree.get_type_string(&child) {
            Some(ty) => println!("{:<48} {}", child.to_string().as_str().green(), ty.as_str().dimmed()),
            None => println!("{:<48} {} option(s)", child.to_string().as_str().cyan(), count),
        }
    }
    Ok(())
}

/// Print type, capabilities, documentation and definitions of one option.
pub fn show(session: &Session, attribute: &str) -> Result<()> {
    let tree = load_tree(session)?;
    let attribute = parse_attribute(attribute)?;
    let leaf = tree
        .leaf(&attribute)
        .ok_or_else(|| anyhow!("`{attribute}` is not an option"))?;
    let schema = leaf.schema();

    println!("{}", attribute.to_string().as_str().bold());
    println!("  {:<12} {}", "type:".dimmed(), schema.option_type);
    let capabilities: Vec<_> = schema
        .option_type
        .field_capabilities()
        .iter()
        .map(|c| format!("{c:?}"))
        .collect();
    println!("  {:<12} {}", "editors:".dimmed(), capabilities.join(", "));
    if let Some(description) = &schema.description {
        println!("  {:<12} {}", "description:".dimmed(), description.trim());
    }
    let default = match &schema.default {
        OptionDefault::NoDefault => "none".to_string(),
        OptionDefault::Declared(definition) => describe(definition),
    };
    println!("  {:<12} {}", "default:".dimmed(), default);
    println!("  {:<12} {}", "configured:".dimmed(), describe(leaf.configured()));
    if let Some(value) = tree.get_option_value(&attribute) {
        println!("  {:<12} {}", "value:".dimmed(), describe(value));
    }
    if let Some(error) = leaf.evaluation_error() {
        println!("  {:<12} {}", "error:".red(), error.diagnostic.trim());
    }
    Ok(())
}

/// Print the next branching point below `attribute`.
pub fn nav(session: &Session, attribute: &str) -> Result<()> {
    let tree = load_tree(session)?;
    let attribute = parse_attribute(attribute)?;
    let target = tree.next_branching_point(&attribute)?;
    println!("{target}");
    Ok(())
}

/// Apply assignments to the tree and save the changed file.
pub fn set(session: &Session, args: &SetArgs) -> Result<()> {
    let mut tree = load_tree(session)?;
    let baseline = tree.baseline();

    for assignment in &args.assignments {
        let (name, expression) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("`{assignment}` is not of the form ATTR=EXPR"))?;
        let attribute = parse_attribute(name.trim())?;
        let expression = expression.trim();

        let definition = if expression.is_empty() {
            OptionDefinition::undefined()
        } else {
            OptionDefinition::from_expression(expression)
                .evaluate(session.evaluator())
                .with_context(|| format!("cannot evaluate the new value of `{attribute}`"))?
        };
        tree.set_definition(&attribute, definition)?;
    }

    let changes: Vec<Change<'_>> = tree.iter_changes(&baseline).collect();
    if changes.is_empty() {
        println!("{}", "nothing changed".yellow());
        return Ok(());
    }
    for change in &changes {
        println!(
            "{} {} {} {}",
            change.attribute.to_string().as_str().bold(),
            describe(change.baseline).as_str().red(),
            "->".dimmed(),
            describe(change.current).as_str().green()
        );
    }

    if args.dry_run {
        return Ok(());
    }
    let saved = session
        .apply_changes(&tree, &baseline)
        .context("failed to save the configuration")?;
    println!("{} {}", "saved".green(), saved.display());
    Ok(())
}

/// Print every option whose configured expression failed to evaluate.
pub fn errors(session: &Session) -> Result<()> {
    let tree = load_tree(session)?;
    let mut found = false;
    for (attribute, error) in tree.evaluation_errors() {
        found = true;
        println!("{} = {}", attribute.to_string().as_str().bold(), error.expression);
        for line in error.diagnostic.lines() {
            println!("    {}", line.red());
        }
    }
    if !found {
        println!("{}", "all configured options evaluate".green());
    }
    Ok(())
}

/// Print the editor configuration schema.
pub fn schema() -> Result<()> {
    let schema = EditorConfig::json_schema()?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn load_tree(session: &Session) -> Result<OptionTree> {
    session.option_tree().with_context(|| {
        format!(
            "failed to load options for {}",
            session.source().display()
        )
    })
}

fn parse_attribute(text: &str) -> Result<Attribute> {
    text.parse::<Attribute>()
        .with_context(|| format!("invalid attribute `{text}`"))
}

fn describe(definition: &OptionDefinition) -> String {
    if let Some(text) = definition.expression() {
        return text.to_string();
    }
    match definition.obj() {
        Some(value) => value.to_string(),
        None => "undefined".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe() {
        assert_eq!(describe(&OptionDefinition::undefined()), "undefined");
        assert_eq!(
            describe(&OptionDefinition::from_expression("pkgs.vim")),
            "pkgs.vim"
        );
        assert_eq!(
            describe(&OptionDefinition::from_object(json!([1, 2]))),
            "[1,2]"
        );
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(
            parse_attribute("a.\"b.c\"").unwrap().segments(),
            ["a", "b.c"]
        );
        assert!(parse_attribute("a..b").is_err());
    }
}
