//! Terminal rendering of plans, results and schemas

use colored::{ColoredString, Colorize};
use nimbus_core::effect::Effect;
use nimbus_core::interpreter::{ApplyResult, EffectOutcome};
use nimbus_core::plan::Plan;
use nimbus_core::provider::Provider;
use nimbus_core::resource::{Resource, State, Value};
use nimbus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

const SENSITIVE: &str = "(sensitive)";

pub fn print_plan<P: Provider + ?Sized>(plan: &Plan, provider: &P) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();
    for effect in plan.effects() {
        let data_source = matches!(effect, Effect::Read(_));
        let schema = provider.schema(&effect.resource_id().resource_type, data_source);
        for line in effect_lines(effect, schema) {
            println!("{}", line);
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

fn symbol(effect: &Effect) -> ColoredString {
    match effect {
        Effect::Create(_) => "+".green().bold(),
        Effect::Update { .. } => "~".yellow().bold(),
        Effect::Replace { .. } => "-/+".magenta().bold(),
        Effect::Delete(_) => "-".red().bold(),
        Effect::Read(_) => "<=".cyan(),
    }
}

/// One header line plus one line per attribute that matters for the effect
fn effect_lines(effect: &Effect, schema: Option<&ResourceSchema>) -> Vec<String> {
    let mut lines = Vec::new();
    let header = match effect {
        Effect::Replace { id, changed, .. } if changed.is_empty() => format!("{} (tainted)", id),
        Effect::Replace { id, changed, .. } => {
            format!("{} (forces replacement: {})", id, changed.join(", "))
        }
        other => other.resource_id().to_string(),
    };
    lines.push(format!("  {} {}", symbol(effect), header.bold()));

    match effect {
        Effect::Create(resource) | Effect::Read(resource) => {
            lines.extend(
                sorted_attributes(resource)
                    .into_iter()
                    .map(|(name, value)| {
                        format!("      {}: {}", name, display(schema, name, value))
                    }),
            );
        }
        Effect::Update { from, to, changed, .. } | Effect::Replace { from, to, changed, .. } => {
            for name in changed {
                let old = from
                    .attributes
                    .get(name)
                    .map_or_else(|| "(none)".to_string(), |v| display(schema, name, v));
                let new = to
                    .attributes
                    .get(name)
                    .map_or_else(|| "(none)".to_string(), |v| display(schema, name, v));
                lines.push(format!("      {}: {} => {}", name, old.red(), new.green()));
            }
        }
        Effect::Delete(_) => {}
    }
    lines
}

fn sorted_attributes(resource: &Resource) -> Vec<(&String, &Value)> {
    let mut attributes: Vec<_> = resource.attributes.iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(b.0));
    attributes
}

fn display(schema: Option<&ResourceSchema>, name: &str, value: &Value) -> String {
    let sensitive = schema
        .and_then(|s| s.get(name))
        .is_some_and(|attr| attr.sensitive || attr.write_only);
    if sensitive {
        SENSITIVE.to_string()
    } else {
        format_value(value)
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{} = {}", k, format_value(v)))
                .collect();
            entries.sort();
            format!("{{{}}}", entries.join(", "))
        }
        scalar => scalar.scalar_string().unwrap_or_default(),
    }
}

/// Per-effect result lines and the final tally
pub fn print_apply_result(result: &ApplyResult) {
    for outcome in &result.outcomes {
        match outcome {
            Ok(EffectOutcome::Created { state }) => {
                println!("  {} created {}", "✓".green(), label(state))
            }
            Ok(EffectOutcome::Updated { state }) => {
                println!("  {} updated {}", "✓".green(), label(state))
            }
            Ok(EffectOutcome::Replaced { state }) => {
                println!("  {} replaced {}", "✓".green(), label(state))
            }
            Ok(EffectOutcome::Deleted { id }) => println!("  {} deleted {}", "✓".green(), id),
            Ok(EffectOutcome::Read { state }) => {
                println!("  {} read {}", "✓".green(), label(state))
            }
            Ok(EffectOutcome::Skipped { reason }) => {
                println!("  {} skipped: {}", "-".normal(), reason)
            }
            Err(e) => println!("  {} {}", "✗".red(), e),
        }
    }
    println!();
    if result.is_success() {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", result.success_count)
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "Apply failed. {} succeeded, {} failed.",
                result.success_count, result.failure_count
            )
            .red()
            .bold()
        );
    }
}

fn label(state: &State) -> String {
    match &state.identifier {
        Some(identifier) => format!("{} [id={}]", state.id, identifier),
        None => state.id.to_string(),
    }
}

/// Attribute table of one kind
pub fn print_schema(schema: &ResourceSchema) {
    println!("{}", schema.resource_type.cyan().bold());
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }
    println!();
    for (name, attr) in &schema.attributes {
        println!("  {:<36} {:<22} {}", name, attr.attr_type.to_string(), flags(attr).dimmed());
        if let AttributeType::Block(block) = &attr.attr_type {
            for (inner, inner_attr) in &block.attributes {
                println!(
                    "    {:<34} {:<22} {}",
                    inner,
                    inner_attr.attr_type.to_string(),
                    flags(inner_attr).dimmed()
                );
            }
        }
    }
}

fn flags(attr: &AttributeSchema) -> String {
    let mut flags = Vec::new();
    if attr.required {
        flags.push("required".to_string());
    }
    if attr.optional {
        flags.push("optional".to_string());
    }
    if attr.computed {
        flags.push("computed".to_string());
    }
    if attr.force_new {
        flags.push("forces new".to_string());
    }
    if attr.sensitive {
        flags.push("sensitive".to_string());
    }
    if attr.write_only {
        flags.push("write-only".to_string());
    }
    if let Some(default) = &attr.default {
        flags.push(format!("default {}", format_value(default)));
    }
    flags.join(", ")
}
