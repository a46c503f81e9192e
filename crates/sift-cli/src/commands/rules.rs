//! Rule command implementations

use anyhow::Result;
use sift_core::models::{MatchField, NewRule, PatternType, RuleCreator, RuleUpdate};
use sift_core::{Database, RuleMatcher};

use super::{truncate, CLI_CALLER};

pub fn cmd_rules_list(db: &Database, include_inactive: bool) -> Result<()> {
    let rules = db.list_rules(!include_inactive)?;

    if rules.is_empty() {
        println!("No rules defined. Add one with:");
        println!("  sift rules add NETFLIX --category Entertainment");
        return Ok(());
    }

    println!();
    println!("📏 Categorization Rules");
    println!("   ─────────────────────────────────────────────────────────────");

    for rule in rules {
        let status = if rule.active { "" } else { " (inactive)" };
        println!(
            "   [{}] v{} {:<8} {:<11} \"{}\" → {} ({:.2}, {}){}",
            rule.id,
            rule.version,
            rule.pattern_type.as_str(),
            rule.match_field.as_str(),
            truncate(&rule.pattern, 30),
            rule.category,
            rule.confidence_weight,
            rule.created_by.as_str(),
            status
        );
    }

    Ok(())
}

pub struct AddRuleArgs<'a> {
    pub pattern: &'a str,
    pub category: &'a str,
    pub subcategory: Option<&'a str>,
    pub pattern_type: &'a str,
    pub field: &'a str,
    pub weight: f64,
}

pub fn cmd_rules_add(db: &Database, args: AddRuleArgs<'_>) -> Result<i64> {
    let pattern_type: PatternType = args
        .pattern_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let match_field: MatchField = args.field.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let rule = db.create_rule(&NewRule {
        pattern: args.pattern.to_string(),
        pattern_type,
        match_field,
        category: args.category.to_string(),
        subcategory: args.subcategory.map(String::from),
        confidence_weight: args.weight,
        created_by: RuleCreator::Manual,
    })?;
    db.log_audit(
        CLI_CALLER,
        "create_rule",
        Some("rule"),
        Some(rule.id),
        Some(&format!("pattern={}, category={}", rule.pattern, rule.category)),
    )?;

    println!(
        "✅ Created rule {}: \"{}\" → {}",
        rule.id, rule.pattern, rule.category
    );
    Ok(rule.id)
}

pub fn cmd_rules_update(
    db: &Database,
    id: i64,
    category: Option<String>,
    weight: Option<f64>,
    reason: &str,
) -> Result<()> {
    if category.is_none() && weight.is_none() {
        anyhow::bail!("Nothing to update: pass --category and/or --weight");
    }

    let rule = db.update_rule(
        id,
        &RuleUpdate {
            category,
            confidence_weight: weight,
            reason: reason.to_string(),
            ..Default::default()
        },
    )?;
    db.log_audit(
        CLI_CALLER,
        "update_rule",
        Some("rule"),
        Some(id),
        Some(&format!("version={}", rule.version)),
    )?;

    println!(
        "✅ Rule {} is now v{}: → {} ({:.2})",
        rule.id, rule.version, rule.category, rule.confidence_weight
    );
    Ok(())
}

pub fn cmd_rules_deactivate(db: &Database, id: i64, reason: &str) -> Result<()> {
    let rule = db.deactivate_rule(id, reason)?;
    db.log_audit(
        CLI_CALLER,
        "deactivate_rule",
        Some("rule"),
        Some(id),
        Some(reason),
    )?;

    println!("✅ Deactivated rule {} (v{})", rule.id, rule.version);
    Ok(())
}

pub fn cmd_rules_history(db: &Database, id: i64) -> Result<()> {
    let rule = db
        .get_rule(id)?
        .ok_or_else(|| anyhow::anyhow!("Rule {} not found", id))?;
    let revisions = db.list_rule_revisions(id)?;

    println!();
    println!("📜 History of rule {} (\"{}\")", rule.id, rule.pattern);
    println!("   ─────────────────────────────────────────────────────────────");

    for rev in revisions {
        let run = rev
            .improvement_run_id
            .map(|r| format!(" [run {}]", r))
            .unwrap_or_default();
        println!(
            "   v{} {} │ {} ({:.2}){} │ {}{}",
            rev.version,
            rev.created_at.format("%Y-%m-%d %H:%M"),
            rev.category,
            rev.confidence_weight,
            if rev.active { "" } else { " inactive" },
            rev.reason,
            run
        );
    }

    Ok(())
}

pub fn cmd_rules_test(db: &Database, description: &str) -> Result<()> {
    let matcher = RuleMatcher::load(db)?;
    let matches = matcher.matching(description, None);

    if matches.is_empty() {
        println!("No active rule matches \"{}\"", description);
        return Ok(());
    }

    println!("Rules matching \"{}\":", description);
    for (rule, field) in matches {
        println!(
            "   [{}] \"{}\" on {} → {} ({:.2})",
            rule.id,
            rule.pattern,
            field.as_str(),
            rule.category,
            rule.confidence_weight
        );
    }

    Ok(())
}
