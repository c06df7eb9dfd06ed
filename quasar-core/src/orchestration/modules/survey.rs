use crate::error::{EngineError, Result};
use crate::orchestration::context::ModuleContext;
use crate::registry::ResolvedParams;

fn names(params: &ResolvedParams) -> Result<Vec<&str>> {
    let names: Vec<&str> = params
        .string("algorithms")?
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return Err(EngineError::Validation(
            "`algorithms` must name at least one algorithm".into(),
        ));
    }
    Ok(names)
}

pub(super) fn validate(params: &ResolvedParams) -> Result<()> {
    names(params).map(|_| ())
}

pub(super) async fn run(ctx: &ModuleContext) -> Result<()> {
    let version = ctx.formula_version()?;
    for name in names(ctx.params())? {
        ctx.checkpoint()?;
        let draft = ctx.estimator().assess_algorithm(name, version)?;
        ctx.record(draft)?;
    }
    Ok(())
}
