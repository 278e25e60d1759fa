use crate::span::Span;

/// A lowering diagnostic (error or warning).
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
    /// Secondary locations, e.g. the declaration a warning refers back to.
    pub related: Vec<(Span, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
            related: Vec::new(),
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
            related: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn with_related(mut self, span: Span, message: String) -> Self {
        self.related.push((span, message));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for (span, message) in &self.related {
            report = report.with_label(
                Label::new((filename, span.start as usize..span.end as usize))
                    .with_message(message)
                    .with_color(Color::Blue),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if report
            .finish()
            .eprint((filename, Source::from(source)))
            .is_err()
        {
            self.render_plain();
        }
    }

    /// Render without source context (`error: message` plus notes).
    pub fn render_plain(&self) {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{}: {}", label, self.message);
        for (_, message) in &self.related {
            eprintln!("  = related: {}", message);
        }
        for note in &self.notes {
            eprintln!("  = note: {}", note);
        }
        if let Some(help) = &self.help {
            eprintln!("  = help: {}", help);
        }
    }
}

/// Receiver for diagnostics produced while lowering.
///
/// The engine reports into a sink and never retries; whoever owns the sink
/// decides how to surface the messages.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}
