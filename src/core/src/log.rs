//! Per-architecture logging context.

use tracing::Span;

/// Architecture tag carried explicitly into each resolution task.
///
/// Records emitted while the span is entered carry `arch=<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchContext {
    arch: String,
}

impl ArchContext {
    pub fn new(arch: impl Into<String>) -> Self {
        Self { arch: arch.into() }
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn span(&self) -> Span {
        tracing::info_span!("arch", arch = %self.arch)
    }
}

impl std::fmt::Display for ArchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_context() {
        let ctx = ArchContext::new("s390x");
        assert_eq!(ctx.arch(), "s390x");
        assert_eq!(ctx.to_string(), "s390x");
        let _guard = ctx.span().entered();
    }
}
