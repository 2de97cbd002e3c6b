use std::error::Error;
use std::path::Path;

use crate::mask::FeatureMask;

/// Solution table: one row per hall member, one 0/1 column per feature of
/// the reduced space.
pub fn write_solution_features<P: AsRef<Path>>(
    path: P,
    feature_names: &[String],
    masks: &[FeatureMask],
) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["id".to_string()];
    header.extend_from_slice(feature_names);
    writer.write_record(&header)?;
    for (row, mask) in masks.iter().enumerate() {
        assert!(
            mask.len() == feature_names.len(),
            "mask of {} features in a table of {}",
            mask.len(),
            feature_names.len()
        );
        let mut record = vec![row.to_string()];
        record.extend((0..mask.len()).map(|i| if mask.get(i) { "1" } else { "0" }.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_solution_features<P: AsRef<Path>>(
    path: P,
) -> Result<(Vec<String>, Vec<FeatureMask>), Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let feature_names: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(|h| h.to_string())
        .collect();
    let mut masks = Vec::new();
    for record in reader.records() {
        let record = record?;
        let bits: Result<Vec<bool>, Box<dyn Error>> = record
            .iter()
            .skip(1)
            .map(|cell| match cell {
                "0" => Ok(false),
                "1" => Ok(true),
                other => Err(format!("invalid mask cell '{}'", other).into()),
            })
            .collect();
        masks.push(FeatureMask::from_bools(bits?));
    }
    Ok((feature_names, masks))
}

/// Per-member fitness rows under the three evaluation regimes.
#[derive(Clone, Debug, PartialEq)]
pub struct FitnessTable {
    pub nicks: Vec<String>,
    pub train: Vec<Vec<f64>>,
    pub inner_cv: Vec<Vec<f64>>,
    pub test: Vec<Vec<f64>>,
}

impl FitnessTable {
    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// Values of one regime projected to a single objective column.
    pub fn column(rows: &[Vec<f64>], objective: usize) -> Vec<f64> {
        rows.iter().map(|r| r[objective]).collect()
    }
}

/// Columns are grouped per objective: `train_<nick>`, `inner_cv_<nick>`,
/// `test_<nick>`, in objective order.
pub fn write_fitnesses<P: AsRef<Path>>(path: P, table: &FitnessTable) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["id".to_string()];
    for nick in &table.nicks {
        header.push(format!("train_{}", nick));
        header.push(format!("inner_cv_{}", nick));
        header.push(format!("test_{}", nick));
    }
    writer.write_record(&header)?;
    for row in 0..table.len() {
        let mut record = vec![row.to_string()];
        for o in 0..table.nicks.len() {
            record.push(table.train[row][o].to_string());
            record.push(table.inner_cv[row][o].to_string());
            record.push(table.test[row][o].to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_fitnesses<P: AsRef<Path>>(path: P) -> Result<FitnessTable, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut nicks = Vec::new();
    for header in headers.iter().skip(1) {
        if let Some(nick) = header.strip_prefix("train_") {
            nicks.push(nick.to_string());
        }
    }
    let n = nicks.len();
    if headers.len() != 1 + 3 * n {
        return Err(format!(
            "malformed fitness table: {} columns for {} objectives",
            headers.len(),
            n
        )
        .into());
    }
    let mut table = FitnessTable {
        nicks,
        train: Vec::new(),
        inner_cv: Vec::new(),
        test: Vec::new(),
    };
    for record in reader.records() {
        let record = record?;
        if record.len() != 1 + 3 * n {
            return Err(format!(
                "malformed fitness table: row {} has {} columns for {} objectives",
                table.train.len(),
                record.len(),
                n
            )
            .into());
        }
        let mut train = Vec::with_capacity(n);
        let mut inner_cv = Vec::with_capacity(n);
        let mut test = Vec::with_capacity(n);
        for o in 0..n {
            train.push(record[1 + 3 * o].parse::<f64>()?);
            inner_cv.push(record[2 + 3 * o].parse::<f64>()?);
            test.push(record[3 + 3 * o].parse::<f64>()?);
        }
        table.train.push(train);
        table.inner_cv.push(inner_cv);
        table.test.push(test);
    }
    Ok(table)
}

/// Confusion matrix of one categorical objective: rows are true labels,
/// columns predicted labels, both in label order.
pub fn write_confusion<P: AsRef<Path>>(
    path: P,
    labels: &[String],
    counts: &[Vec<usize>],
) -> Result<(), Box<dyn Error>> {
    assert!(
        counts.len() == labels.len() && counts.iter().all(|r| r.len() == labels.len()),
        "confusion matrix shape does not match {} labels",
        labels.len()
    );
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["truth".to_string()];
    header.extend(labels.iter().map(|l| format!("predicted_{}", l)));
    writer.write_record(&header)?;
    for (label, row) in labels.iter().zip(counts.iter()) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|c| c.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Tally a confusion matrix from parallel label vectors.
pub fn confusion_counts(predicted: &[usize], truth: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let mut counts = vec![vec![0usize; n_classes]; n_classes];
    for (&p, &t) in predicted.iter().zip(truth.iter()) {
        counts[t][p] += 1;
    }
    counts
}
