//! Diagnostic catalogue and the bag passes report into.
//!
//! Every rule has a stable identifier (`KLN####`), a default severity and a message
//! template with positional `{0}`, `{1}`, ... placeholders. Passes never stop at the
//! first problem; they push into a [`Diagnostics`] bag and the pipeline decides whether
//! to continue.

use std::collections::BTreeSet;
use std::fmt;

use kiln_syntax::Span;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

macro_rules! diagnostic_ids {
    ($($variant:ident = $code:literal, $severity:ident, $template:literal;)*) => {
        /// Identifier of a diagnostic rule.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum DiagnosticId {
            $($variant,)*
        }

        impl DiagnosticId {
            pub const ALL: &'static [DiagnosticId] = &[$(DiagnosticId::$variant,)*];

            /// Stable code, e.g. `KLN0005`.
            pub fn code(self) -> &'static str {
                match self {
                    $(DiagnosticId::$variant => $code,)*
                }
            }

            pub fn default_severity(self) -> Severity {
                match self {
                    $(DiagnosticId::$variant => Severity::$severity,)*
                }
            }

            pub fn message_template(self) -> &'static str {
                match self {
                    $(DiagnosticId::$variant => $template,)*
                }
            }
        }
    };
}

diagnostic_ids! {
    AnonymousObject = "KLN0001", Error, "An anonymous object cannot be created in a shader";
    AsyncModifier = "KLN0002", Error, "The method {0} cannot be async, as the async modifier cannot be used in a shader";
    AwaitExpression = "KLN0003", Error, "An await expression cannot be used in a shader";
    CheckedExpression = "KLN0004", Error, "A checked expression cannot be used in a shader";
    CheckedStatement = "KLN0005", Error, "A checked statement cannot be used in a shader";
    FixedStatement = "KLN0006", Error, "A fixed statement cannot be used in a shader";
    ForEachStatement = "KLN0007", Error, "A foreach statement cannot be used in a shader";
    LockStatement = "KLN0008", Error, "A lock statement cannot be used in a shader";
    QueryExpression = "KLN0009", Error, "A LINQ query expression cannot be used in a shader";
    RangeExpression = "KLN0010", Error, "A range or index-from-end expression cannot be used in a shader";
    RecursivePattern = "KLN0011", Error, "A recursive pattern cannot be used in a shader";
    RelationalPattern = "KLN0012", Error, "A relational pattern cannot be used in a shader";
    RefType = "KLN0013", Error, "A ref local, ref return or ref expression cannot be used in a shader";
    SizeOf = "KLN0014", Error, "The sizeof operator cannot be used in a shader";
    StackAlloc = "KLN0015", Error, "A stackalloc expression cannot be used in a shader";
    Throw = "KLN0016", Error, "A throw statement or expression cannot be used in a shader";
    TryCatch = "KLN0017", Error, "A try, catch or finally block cannot be used in a shader";
    TupleType = "KLN0018", Error, "A tuple type or tuple literal cannot be used in a shader";
    UsingStatement = "KLN0019", Error, "A using statement or declaration cannot be used in a shader";
    Yield = "KLN0020", Error, "A yield statement cannot be used in a shader";
    PointerType = "KLN0021", Error, "A pointer type or pointer operation cannot be used in a shader";
    FunctionPointerType = "KLN0022", Error, "A function pointer type cannot be used in a shader";
    UnsafeModifier = "KLN0023", Error, "The method {0} cannot be unsafe, as the unsafe modifier cannot be used in a shader";
    UnsafeStatement = "KLN0024", Error, "An unsafe block cannot be used in a shader";
    StringLiteral = "KLN0025", Error, "A string literal cannot be used in a shader";
    InvalidObjectCreation = "KLN0026", Error, "An object of type {0} cannot be created in a shader";
    InvalidLocalType = "KLN0027", Error, "A local variable of type {0} cannot be declared in a shader";
    NonConstantMatrixSwizzle = "KLN0028", Error, "A matrix swizzle must use constant MatrixIndex arguments";
    InvalidMethodCall = "KLN0029", Error, "The method {0} cannot be called from a shader";
    UnsupportedExpression = "KLN0030", Error, "The {0} expression cannot be used in a shader";
    AmbiguousMethodCall = "KLN0031", Error, "The call to {0} matches more than one overload, and the argument types do not select one of them";

    InvalidShaderFieldType = "KLN0100", Error, "The shader of type {0} contains a field \"{1}\" of an invalid type {2}";
    InvalidStaticFieldType = "KLN0101", Error, "The shader of type {0} contains a static field \"{1}\" of an invalid type {2}";
    InvalidGroupSharedFieldType = "KLN0102", Error, "The group shared field \"{1}\" in the shader of type {0} must be an array, but has type {2}";
    InvalidGroupSharedElementType = "KLN0103", Error, "The group shared field \"{1}\" in the shader of type {0} has an invalid element type {2}";
    InvalidGroupSharedDeclaration = "KLN0104", Error, "The group shared field \"{1}\" in the shader of type {0} must be a static field of a compute shader";
    MissingShaderResources = "KLN0105", Warning, "The compute shader of type {0} does not capture any resources, so it cannot produce observable results";
    InvalidThreadIdsUsage = "KLN0110", Error, "ThreadIds can only be used within the Execute method of a compute shader (used in {0})";
    InvalidGroupIdsUsage = "KLN0111", Error, "GroupIds can only be used within the Execute method of a compute shader (used in {0})";
    InvalidGridIdsUsage = "KLN0112", Error, "GridIds can only be used within the Execute method of a compute shader (used in {0})";
    InvalidGroupSizeUsage = "KLN0113", Error, "GroupSize can only be used within the Execute method of a compute shader (used in {0})";
    InvalidDispatchSizeUsage = "KLN0114", Error, "DispatchSize can only be used within the Execute method of a compute shader (used in {0})";
    PropertyDeclaration = "KLN0115", Error, "The shader of type {0} declares the property \"{1}\", but properties cannot be used in a shader";
    DispatchDataSizeExceeded = "KLN0120", Error, "The shader of type {0} captures {1} bytes of constant data, which exceeds the limit of {2} bytes";
    MultipleShaderInterfaces = "KLN0121", Error, "The type {0} implements more than one shader interface";
    MissingShaderInterface = "KLN0122", Error, "The type {0} does not implement a shader interface";
    MissingExecuteMethod = "KLN0123", Error, "The shader of type {0} does not declare an Execute method";
    InvalidThreadGroupSize = "KLN0124", Error, "The thread group size {1} of the shader of type {0} is invalid";
    InvalidDispatchAxis = "KLN0125", Error, "The shader of type {0} must dispatch along at least one axis";
    InvalidDiscoveredType = "KLN0126", Error, "The type {0} has no HLSL equivalent and cannot be used in a shader";

    InvalidD2DInputCount = "KLN0130", Error, "The D2D1 shader of type {0} has an invalid input count of {1} (it must be in the [0, 8] range)";
    MissingD2DInputCount = "KLN0131", Error, "The D2D1 shader of type {0} does not declare its number of inputs";
    RepeatedD2DSimpleInputIndex = "KLN0132", Error, "The D2D1 shader of type {0} declares the simple input index {1} more than once";
    RepeatedD2DComplexInputIndex = "KLN0133", Error, "The D2D1 shader of type {0} declares the complex input index {1} more than once";
    OverlappingD2DInputIndex = "KLN0134", Error, "The D2D1 shader of type {0} declares the input index {1} as both simple and complex";
    D2DInputIndexOutOfRange = "KLN0135", Error, "The D2D1 shader of type {0} declares the input index {1}, which is outside of the [0, {2}) range";
    D2DInputDescriptionIndexOutOfRange = "KLN0136", Error, "The D2D1 shader of type {0} describes the input index {1}, which is outside of the [0, {2}) range";
    RepeatedD2DInputDescriptionIndex = "KLN0137", Error, "The D2D1 shader of type {0} describes the input index {1} more than once";

    ResourceTextureIndexOutOfRange = "KLN0140", Error, "The resource texture field \"{1}\" in the D2D1 shader of type {0} has index {2}, which must be less than 16";
    ResourceTextureIndexOverlapsInput = "KLN0141", Error, "The resource texture field \"{1}\" in the D2D1 shader of type {0} has index {2}, which overlaps with an input (the shader declares {3} inputs)";
    RepeatedResourceTextureIndex = "KLN0142", Error, "The resource texture field \"{1}\" in the D2D1 shader of type {0} reuses index {2}";
    MissingResourceTextureIndex = "KLN0143", Error, "The resource texture field \"{1}\" in the D2D1 shader of type {0} does not have an assigned index";
    ResourceTextureIndexOnInvalidField = "KLN0144", Error, "A resource texture index is assigned to \"{1}\" in the D2D1 shader of type {0}, which is not a resource texture field";
    InvalidResourceTextureElementType = "KLN0145", Error, "The resource texture field \"{1}\" in the D2D1 shader of type {0} has element type {2}, but only float and float4 are supported";

    MissingScenePositionCapability = "KLN0150", Error, "The D2D1 shader of type {0} uses the scene position, but does not declare that it requires it";
    ColumnMajorPackingOption = "KLN0151", Error, "The shader of type {0} requests column-major matrix packing, which is not supported";
    EnableLinkingWithComplexInputs = "KLN0152", Error, "The D2D1 shader of type {0} enables linking, which is not supported for shaders with complex inputs";
    InaccessibleTargetType = "KLN0153", Error, "The shader of type {0} is not accessible, so its descriptor cannot be generated";
    InaccessibleFieldType = "KLN0154", Error, "The field \"{1}\" in the shader of type {0} has the type {2}, which is not accessible";
    InvalidEffectId = "KLN0160", Error, "The D2D1 shader of type {0} has an invalid effect id \"{1}\" (it must be a GUID)";
    InvalidEffectDisplayName = "KLN0161", Error, "The D2D1 shader of type {0} has an invalid effect display name";
    InvalidEffectDescription = "KLN0162", Error, "The D2D1 shader of type {0} has an invalid effect description";
    InvalidEffectCategory = "KLN0163", Error, "The D2D1 shader of type {0} has an invalid effect category";
    InvalidEffectAuthor = "KLN0164", Error, "The D2D1 shader of type {0} has an invalid effect author";
    UninferrableLocalType = "KLN0170", Error, "The type of the local \"{0}\" cannot be inferred; declare it with an explicit type";

    CompilerWin32Failure = "KLN0200", Error, "The shader of type {0} failed to compile (HRESULT 0x{1}): {2}";
    CompilerError = "KLN0201", Error, "The shader of type {0} failed to compile: {1}";
}

impl fmt::Display for DiagnosticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn render_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let placeholder = after
            .find('}')
            .and_then(|close| Some((after[..close].parse::<usize>().ok()?, close)));
        match placeholder {
            Some((index, close)) => {
                out.push_str(args.get(index).copied().unwrap_or(""));
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub id: DiagnosticId,
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(id: DiagnosticId, span: Option<Span>, args: &[&str]) -> Self {
        Self {
            id,
            severity: id.default_severity(),
            message: render_template(id.message_template(), args),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{span}: {} {}: {}", self.severity, self.id, self.message),
            None => write!(f, "{} {}: {}", self.severity, self.id, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// Ordered collection of diagnostics produced by one pass or the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn report(&mut self, id: DiagnosticId, span: Option<Span>, args: &[&str]) {
        self.push(Diagnostic::new(id, span, args));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| !d.is_error())
    }

    /// Distinct rule identifiers present in the bag.
    pub fn ids(&self) -> BTreeSet<DiagnosticId> {
        self.items.iter().map(|d| d.id).collect()
    }

    pub fn contains(&self, id: DiagnosticId) -> bool {
        self.items.iter().any(|d| d.id == id)
    }

    /// Sorts by location (span-less diagnostics first) and drops exact duplicates.
    pub fn sort(&mut self) {
        self.items
            .sort_by(|a, b| (a.span, a.id, &a.message).cmp(&(b.span, b.id, &b.message)));
        self.items.dedup();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let codes: BTreeSet<_> = DiagnosticId::ALL.iter().map(|id| id.code()).collect();
        assert_eq!(codes.len(), DiagnosticId::ALL.len());
    }

    #[test]
    fn only_missing_resources_is_a_warning() {
        let warnings: Vec<_> = DiagnosticId::ALL
            .iter()
            .filter(|id| id.default_severity() == Severity::Warning)
            .collect();
        assert_eq!(warnings, [&DiagnosticId::MissingShaderResources]);
    }

    #[test]
    fn templates_substitute_positional_arguments() {
        let diagnostic = Diagnostic::new(
            DiagnosticId::InvalidShaderFieldType,
            Some(Span::new(10, 20, 3, 5)),
            &["Blur", "cache", "string"],
        );
        insta::assert_snapshot!(diagnostic.to_string(), @r#"3:5: error KLN0100: The shader of type Blur contains a field "cache" of an invalid type string"#);
    }

    #[test]
    fn missing_arguments_render_empty() {
        assert_eq!(render_template("a {0} b {1}", &["x"]), "a x b ");
        assert_eq!(render_template("{not a placeholder}", &[]), "{not a placeholder}");
    }

    #[test]
    fn sort_orders_by_span_and_dedups() {
        let mut bag = Diagnostics::new();
        let late = Some(Span::new(50, 60, 4, 1));
        let early = Some(Span::new(5, 6, 1, 6));
        bag.report(DiagnosticId::Throw, late, &[]);
        bag.report(DiagnosticId::LockStatement, early, &[]);
        bag.report(DiagnosticId::Throw, late, &[]);
        bag.report(DiagnosticId::MissingExecuteMethod, None, &["S"]);
        bag.sort();

        let ids: Vec<_> = bag.iter().map(|d| d.id).collect();
        assert_eq!(
            ids,
            [
                DiagnosticId::MissingExecuteMethod,
                DiagnosticId::LockStatement,
                DiagnosticId::Throw
            ]
        );
        assert!(bag.has_errors());
        assert_eq!(bag.warnings().count(), 0);
    }
}
