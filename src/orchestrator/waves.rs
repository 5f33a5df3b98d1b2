//! Partition a startup order into waves.

use crate::core::config::StartupMode;
use crate::core::error::OrchestratorError;
use std::collections::HashSet;

/// Split `order` into waves. Each wave is the longest prefix of the remaining
/// nodes whose dependencies all sit in earlier waves; dependencies on nodes
/// outside `order` count as satisfied. `Sequential` caps every wave at one
/// node. Repeated ids are ignored after their first occurrence.
pub fn plan_waves<F, D>(
    order: &[String],
    dependencies_of: F,
    mode: StartupMode,
) -> Result<Vec<Vec<String>>, OrchestratorError>
where
    F: Fn(&str) -> D,
    D: IntoIterator,
    D::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    let order: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();
    let scheduled: HashSet<&str> = order.iter().copied().collect();

    let mut done: HashSet<&str> = HashSet::new();
    let mut waves = Vec::new();
    let mut next = 0;

    while next < order.len() {
        let mut wave: Vec<&str> = Vec::new();
        let mut blocked: Vec<String> = Vec::new();

        while let Some(&id) = order.get(next) {
            blocked = dependencies_of(id)
                .into_iter()
                .map(|d| d.as_ref().to_string())
                .filter(|d| scheduled.contains(d.as_str()) && !done.contains(d.as_str()))
                .collect();
            if !blocked.is_empty() {
                break;
            }
            wave.push(id);
            next += 1;
            if mode == StartupMode::Sequential {
                break;
            }
        }

        if wave.is_empty() {
            blocked.sort();
            return Err(OrchestratorError::InvalidOrder {
                node: order[next].to_string(),
                waiting_on: blocked,
            });
        }
        done.extend(wave.iter().copied());
        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    Ok(waves)
}
