use std::io::Cursor;

use docx_rs::{AlignmentType, Docx, Footer, Header, Paragraph, Run, Table, TableCell, TableRow};

use crate::{
    analysis::CRITERIA_COUNT,
    error::{ReportError, ReportResult},
    tokens::Locale,
};

struct Labels {
    title: &'static str,
    student: &'static str,
    theme: &'static str,
    date: &'static str,
    class_year: &'static str,
    term: &'static str,
    final_score: &'static str,
    criterion: &'static str,
    score: &'static str,
    analysis: &'static str,
    comments: &'static str,
    originality: &'static str,
}

impl Labels {
    fn for_locale(locale: Locale) -> Self {
        match locale {
            Locale::English => Labels {
                title: "Essay Evaluation",
                student: "Student",
                theme: "Theme",
                date: "Date",
                class_year: "Class",
                term: "Term",
                final_score: "Final score",
                criterion: "Criterion",
                score: "Score",
                analysis: "Analysis",
                comments: "General comments",
                originality: "Originality",
            },
            Locale::Portuguese => Labels {
                title: "Correção de Redação",
                student: "Aluno",
                theme: "Tema",
                date: "Data",
                class_year: "Turma",
                term: "Bimestre",
                final_score: "Nota final",
                criterion: "Competência",
                score: "Nota",
                analysis: "Análise",
                comments: "Comentários gerais",
                originality: "Originalidade",
            },
        }
    }
}

fn labelled(label: &str, token: &str) -> Paragraph {
    Paragraph::new()
        .add_run(Run::new().add_text(format!("{label}: ")).bold())
        .add_run(Run::new().add_text(token))
}

fn cell(text: &str, bold: bool) -> TableCell {
    let run = Run::new().add_text(text);
    let run = if bold { run.bold() } else { run };
    TableCell::new().add_paragraph(Paragraph::new().add_run(run))
}

/// A fresh `.docx` laid out as a graded essay report, with placeholders for
/// every field of the record.
pub fn default_template(locale: Locale) -> ReportResult<Vec<u8>> {
    let labels = Labels::for_locale(locale);

    let header = Header::new().add_paragraph(
        Paragraph::new()
            .align(AlignmentType::Right)
            .add_run(Run::new().add_text(format!("{}: {{{{NOTA_FINAL}}}}", labels.final_score)).bold()),
    );
    let footer = Footer::new().add_paragraph(
        Paragraph::new()
            .align(AlignmentType::Center)
            .add_run(Run::new().add_text(format!("{}: {{{{TEMA}}}}", labels.theme)).italic()),
    );

    let mut rows = vec![TableRow::new(vec![
        cell(labels.criterion, true),
        cell(labels.score, true),
        cell(labels.analysis, true),
    ])];
    for index in 1..=CRITERIA_COUNT {
        rows.push(TableRow::new(vec![
            cell(&format!("C{index}"), true),
            cell(&format!("{{{{NOTA_C{index}}}}}"), false),
            cell(&format!("{{{{ANALISE_C{index}}}}}"), false),
        ]));
    }

    let docx = Docx::new()
        .header(header)
        .footer(footer)
        .add_paragraph(
            Paragraph::new()
                .align(AlignmentType::Center)
                .add_run(Run::new().add_text(labels.title).bold().size(32)),
        )
        .add_paragraph(labelled(labels.student, "{{NOME_ALUNO}}"))
        .add_paragraph(labelled(labels.theme, "{{TEMA}}"))
        .add_paragraph(labelled(labels.date, "{{DATA}}"))
        .add_paragraph(labelled(labels.class_year, "{{ANO}}"))
        .add_paragraph(labelled(labels.term, "{{BIMESTRE}}"))
        .add_paragraph(labelled(labels.final_score, "{{NOTA_FINAL}}"))
        .add_table(Table::new(rows))
        .add_paragraph(labelled(labels.comments, "{{COMENTARIOS}}"))
        .add_paragraph(labelled(labels.originality, "{{ALERTA_ORIGINALIDADE}}"));

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|err| ReportError::serialization("failed to pack starter template", err))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{CriterionAnalysis, EssayAnalysis},
        docx::extract_text,
        report::{fill_template, inspect_template},
        tokens::build_token_map,
    };

    #[test]
    fn starter_template_holds_every_token_unfragmented() {
        let template = default_template(Locale::Portuguese).expect("template");
        let report = inspect_template(&template).expect("inspect");

        assert_eq!(report.fragmented_count(), 0);
        assert!(report.unknown_placeholders().is_empty());
        let found: Vec<&str> = report
            .placeholders()
            .map(|finding| finding.placeholder.as_str())
            .collect();
        for token in ["{{NOME_ALUNO}}", "{{NOTA_FINAL}}", "{{TEMA}}", "{{ANALISE_C5}}"] {
            assert!(found.contains(&token), "{token} missing");
        }
    }

    #[test]
    fn starter_template_fills_completely() {
        let mut record = EssayAnalysis {
            student_name: Some("Ana Silva".to_string()),
            ..Default::default()
        };
        for index in 1..=CRITERIA_COUNT {
            record.criteria.set(index, CriterionAnalysis::new(120.0, "ok"));
        }
        let template = default_template(Locale::English).expect("template");
        let filled = fill_template(&template, &build_token_map(&record)).expect("fill");

        let text = extract_text(&filled.bytes).expect("extract").join("\n");
        assert!(text.contains("Student: Ana Silva"), "{text}");
        assert!(text.contains("Final score: 600"), "{text}");
        assert!(!text.contains("{{"), "{text}");
        assert_eq!(filled.stats.reconstructed_paragraphs, 0);
    }
}
