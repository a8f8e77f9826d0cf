use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;
use itertools::Itertools;
use rust_xlsxwriter::{Format, Workbook};

use crate::bio::alignment::{alignment_length, AlignedSequences};
use crate::constants::EXPORT_CATEGORIES;
use crate::data_types::{AnalysisResult, EntityMap, ExportFile, MhcClass, OutputFiles,
                        ResidueSet};
use crate::types::{AlleleId, SheetName};

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: impl Into<String>) -> Cell {
        Cell::Text(value.into())
    }

    fn csv_value(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(text) => text.clone(),
            Cell::Number(number) => number.to_string(),
        }
    }

    fn display_width(&self) -> usize {
        match self {
            Cell::Empty => 0,
            Cell::Text(text) => text.chars().count(),
            Cell::Number(number) => number.to_string().len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sheet {
    pub name: SheetName,
    pub rows: Vec<Vec<Cell>>,
    // rows at the top shown in bold and kept visible when scrolling
    pub header_rows: u32,
    // width of every column after the first, fitted to the contents if None
    pub fixed_column_width: Option<f64>,
}

impl Sheet {
    fn new(name: &str, header: Vec<Cell>) -> Sheet {
        Sheet {
            name: name.to_owned(),
            rows: vec![header],
            header_rows: 1,
            fixed_column_width: None,
        }
    }

    fn column_widths(&self) -> Vec<f64> {
        let column_count = self.rows.iter().map(Vec::len).max().unwrap_or(0);

        (0..column_count)
            .map(|col| {
                if col > 0 {
                    if let Some(width) = self.fixed_column_width {
                        return width;
                    }
                }
                let max_len = self.rows.iter()
                    .filter_map(|row| row.get(col))
                    .map(Cell::display_width)
                    .max()
                    .unwrap_or(0);
                (max_len + 2) as f64
            })
            .collect()
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(vec![]);

        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::csv_value))?;
        }

        let bytes = writer.into_inner()
            .map_err(|err| anyhow::anyhow!("failed to write CSV: {}", err))?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// One export category: a workbook with a sheet per class
#[derive(Clone, Debug, PartialEq)]
pub struct ExportBook {
    pub sheets: Vec<Sheet>,
}

impl ExportBook {
    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;

            for (row_idx, row) in sheet.rows.iter().enumerate() {
                let row_num = row_idx as u32;
                let is_header = row_num < sheet.header_rows;

                for (col_idx, cell) in row.iter().enumerate() {
                    let col_num = col_idx as u16;
                    match cell {
                        Cell::Empty => (),
                        Cell::Text(text) if is_header => {
                            worksheet.write_string_with_format(row_num, col_num, text, &bold)?;
                        },
                        Cell::Text(text) => {
                            worksheet.write_string(row_num, col_num, text)?;
                        },
                        Cell::Number(number) if is_header => {
                            worksheet.write_number_with_format(row_num, col_num, *number, &bold)?;
                        },
                        Cell::Number(number) => {
                            worksheet.write_number(row_num, col_num, *number)?;
                        },
                    }
                }
            }

            for (col_idx, width) in sheet.column_widths().into_iter().enumerate() {
                worksheet.set_column_width(col_idx as u16, width)?;
            }

            if sheet.header_rows > 0 {
                worksheet.set_freeze_panes(sheet.header_rows, 0)?;
            }
        }

        let buffer = workbook.save_to_buffer()?;
        Ok(buffer)
    }

    pub fn sheet(&self, sheet_name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == sheet_name)
    }

    pub fn encode(&self) -> Result<ExportFile> {
        let xlsx = self.to_xlsx()?;

        let csv = self.sheets.iter()
            .map(|sheet| {
                let csv_text = sheet.to_csv()
                    .with_context(|| format!("failed to write sheet {}", sheet.name))?;
                Ok((sheet.name.clone(), STANDARD.encode(csv_text)))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        Ok(ExportFile {
            excel: STANDARD.encode(xlsx),
            csv,
        })
    }
}

pub fn decode_excel(export_file: &ExportFile) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(&export_file.excel)?)
}

// None if the workbook has no sheet with that name
pub fn decode_csv(export_file: &ExportFile, sheet_name: &str) -> Result<Option<String>> {
    let Some(encoded) = export_file.csv.get(sheet_name) else {
        return Ok(None);
    };

    let bytes = STANDARD.decode(encoded)?;
    Ok(Some(String::from_utf8(bytes)?))
}

fn residue_cell(residues: Option<&ResidueSet>) -> Cell {
    match residues {
        Some(residues) if !residues.is_empty() => {
            Cell::Text(residues.iter().join(","))
        },
        _ => Cell::Empty,
    }
}

fn column_header(first: &str, length: usize) -> Vec<Cell> {
    let mut header = vec![Cell::text(first)];
    header.extend((1..=length).map(|col| Cell::Number(col as f64)));
    header
}

// the alleles of a class in donor then recipient order, without repeats
fn class_alleles(donors: &EntityMap, recipients: &EntityMap, class: MhcClass) -> Vec<AlleleId> {
    let mut alleles: Vec<AlleleId> = vec![];

    for entity in donors.values().chain(recipients.values()) {
        for allele_id in entity.classified.get(class) {
            if !alleles.contains(allele_id) {
                alleles.push(allele_id.clone());
            }
        }
    }

    alleles
}

fn class_alignment(result: &AnalysisResult, class: MhcClass) -> AlignedSequences {
    class_alleles(&result.donors, &result.recipients, class).into_iter()
        .filter_map(|allele_id| {
            let aligned_seq = result.alignment.get(&allele_id)?.clone();
            Some((allele_id, aligned_seq))
        })
        .collect()
}

pub fn input_book(result: &AnalysisResult) -> ExportBook {
    let sheets = result.classes_to_show.iter()
        .map(|class| {
            let mut sheet = Sheet::new(class.as_str(), vec![Cell::text("ID"), Cell::text("Type"),
                                                           Cell::text("Haplotype")]);
            for entity in result.donors.values().chain(result.recipients.values()) {
                let mut row = vec![Cell::text(&entity.identifier),
                                   Cell::text(entity.entity_type.to_string())];
                row.extend(entity.classified.get(*class).iter().map(Cell::text));
                sheet.rows.push(row);
            }
            sheet
        })
        .collect();

    ExportBook { sheets }
}

pub fn alignment_book(result: &AnalysisResult) -> ExportBook {
    let sheets = result.classes_to_show.iter()
        .map(|class| {
            let alignment = class_alignment(result, *class);
            let length = alignment_length(&alignment);

            let mut sheet = Sheet::new(class.as_str(), column_header("Allele ID", length));
            sheet.header_rows = 2;
            sheet.fixed_column_width = Some(5.0);

            let consensus = result.consensus.get(class).map(String::as_str).unwrap_or("");
            let mut consensus_row = vec![Cell::text("Consensus")];
            consensus_row.extend(consensus.chars().map(|c| Cell::Text(c.to_string())));
            sheet.rows.push(consensus_row);

            for allele_id in class_alleles(&result.donors, &result.recipients, *class) {
                let Some(aligned_seq) = alignment.get(&allele_id) else {
                    continue;
                };
                let mut row = vec![Cell::text(&allele_id)];
                row.extend(aligned_seq.chars().map(|c| Cell::Text(c.to_string())));
                sheet.rows.push(row);
            }

            sheet
        })
        .collect();

    ExportBook { sheets }
}

pub fn sas_scores_book(result: &AnalysisResult) -> ExportBook {
    let sheets = result.classes_to_show.iter()
        .map(|class| {
            let length = alignment_length(&class_alignment(result, *class));
            let mut sheet = Sheet::new(class.as_str(),
                                       column_header("Donor/Recipient ID", length));

            for (entity_id, class_scores) in &result.grouped_sas_scores {
                let Some(scores) = class_scores.get(class) else {
                    continue;
                };
                let mut row = vec![Cell::text(entity_id)];
                row.extend((1..=length).map(|col| {
                    match scores.get(&col).and_then(|score| score.rsa) {
                        Some(rsa) => Cell::Number(rsa),
                        None => Cell::Empty,
                    }
                }));
                sheet.rows.push(row);
            }

            sheet
        })
        .collect();

    ExportBook { sheets }
}

pub fn mismatches_book(result: &AnalysisResult) -> ExportBook {
    let sheets = result.classes_to_show.iter()
        .map(|class| {
            let length = alignment_length(&class_alignment(result, *class));
            let mut sheet = Sheet::new(class.as_str(), column_header("Recipient-Donor", length));

            for (recipient_id, by_donor) in &result.data {
                for (donor_id, by_class) in by_donor {
                    let Some(record) = by_class.get(class) else {
                        continue;
                    };

                    let pair = format!("{}-{}", recipient_id, donor_id);
                    let labelled_rows = [
                        ("initial donor mismatches", &record.donor_diff),
                        ("SAS filtered donor mismatches", &record.updated_mismatches),
                        ("initial recipient mismatches", &record.recip_diff),
                        ("SAS filtered recipient mismatches", &record.updated_recip_mismatches),
                    ];

                    for (label, sets) in labelled_rows {
                        let mut row = vec![Cell::Text(format!("{}: {}", pair, label))];
                        row.extend((0..sets.len().min(length))
                                   .map(|idx| residue_cell(sets.get(idx))));
                        sheet.rows.push(row);
                    }

                    sheet.rows.push(vec![]);
                }
            }

            sheet
        })
        .collect();

    ExportBook { sheets }
}

pub fn eplets_book(result: &AnalysisResult) -> ExportBook {
    let sheets = result.classes_to_show.iter()
        .map(|class| {
            let mut sheet = Sheet::new(class.as_str(),
                                       vec![Cell::text("Recipient-Donor"),
                                            Cell::text("Known Eplets")]);

            for (recipient_id, by_donor) in &result.eplets_found {
                for (donor_id, by_class) in by_donor {
                    let Some(class_eplets) = by_class.get(class) else {
                        continue;
                    };

                    let pair = format!("{}-{}", recipient_id, donor_id);

                    let mut donor_row = vec![Cell::Text(format!("{} donor mismatches", pair))];
                    donor_row.extend(class_eplets.donor_diff.keys().map(Cell::text));
                    sheet.rows.push(donor_row);

                    let mut recip_row =
                        vec![Cell::Text(format!("{} recipient mismatches", pair))];
                    recip_row.extend(class_eplets.recip_diff.keys().map(Cell::text));
                    sheet.rows.push(recip_row);
                }
            }

            sheet
        })
        .collect();

    ExportBook { sheets }
}

pub fn export_book(result: &AnalysisResult, category: &str) -> Option<ExportBook> {
    let book =
        match category {
            "input" => input_book(result),
            "alignment" => alignment_book(result),
            "sas_scores" => sas_scores_book(result),
            "mismatches" => mismatches_book(result),
            "eplets" => eplets_book(result),
            _ => return None,
        };

    Some(book)
}

/// Every export category, encoded for the result payload
pub fn make_output_files(result: &AnalysisResult) -> Result<OutputFiles> {
    EXPORT_CATEGORIES.iter()
        .filter_map(|category| export_book(result, category).map(|book| (*category, book)))
        .map(|(category, book)| {
            let export_file = book.encode()
                .with_context(|| format!("failed to export {}", category))?;
            Ok((category.to_owned(), export_file))
        })
        .collect()
}
