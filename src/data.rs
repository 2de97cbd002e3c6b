use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::param::{DataParam, OutcomeKind};

/// Dense row-major matrix, rows = samples, columns = features.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Matrix {
    values: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

impl Matrix {
    pub fn zeros(n_rows: usize, n_cols: usize) -> Matrix {
        Matrix {
            values: vec![0.0; n_rows * n_cols],
            n_rows,
            n_cols,
        }
    }

    /// Build from sample rows.
    ///
    /// # Panics
    /// Panics when rows have unequal lengths.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Matrix {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for row in &rows {
            assert!(
                row.len() == n_cols,
                "ragged matrix: row of length {} among rows of length {}",
                row.len(),
                n_cols
            );
            values.extend_from_slice(row);
        }
        Matrix {
            values,
            n_rows,
            n_cols,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.n_cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.n_cols..(row + 1) * self.n_cols]
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.n_rows).map(|r| self.get(r, col)).collect()
    }

    pub fn select_columns(&self, cols: &[usize]) -> Matrix {
        let mut values = Vec::with_capacity(self.n_rows * cols.len());
        for row in 0..self.n_rows {
            for &col in cols {
                values.push(self.get(row, col));
            }
        }
        Matrix {
            values,
            n_rows: self.n_rows,
            n_cols: cols.len(),
        }
    }

    pub fn select_rows(&self, rows: &[usize]) -> Matrix {
        let mut values = Vec::with_capacity(rows.len() * self.n_cols);
        for &row in rows {
            values.extend_from_slice(self.row(row));
        }
        Matrix {
            values,
            n_rows: rows.len(),
            n_cols: self.n_cols,
        }
    }

    /// Concatenate blocks along the feature axis.
    ///
    /// # Panics
    /// Panics when blocks disagree on the number of rows.
    pub fn hstack(blocks: &[&Matrix]) -> Matrix {
        if blocks.is_empty() {
            return Matrix::zeros(0, 0);
        }
        let n_rows = blocks[0].n_rows;
        for block in blocks {
            assert!(
                block.n_rows == n_rows,
                "hstack row mismatch: {} vs {}",
                block.n_rows,
                n_rows
            );
        }
        let n_cols = blocks.iter().map(|b| b.n_cols).sum();
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for row in 0..n_rows {
            for block in blocks {
                values.extend_from_slice(block.row(row));
            }
        }
        Matrix {
            values,
            n_rows,
            n_cols,
        }
    }
}

/// Per-sample target, categorical labels or right-censored survival pairs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    Categorical {
        name: String,
        /// label index per sample, indices into `label_order`
        labels: Vec<usize>,
        /// distinct labels, most common first
        label_order: Vec<String>,
    },
    Survival {
        name: String,
        events: Vec<bool>,
        durations: Vec<f64>,
    },
}

impl Outcome {
    /// Build a categorical outcome from raw string labels; the label order is
    /// most-common-first, ties broken by first appearance.
    pub fn categorical(name: &str, raw: Vec<String>) -> Outcome {
        let mut counts: HashMap<&String, (usize, usize)> = HashMap::new();
        for (i, label) in raw.iter().enumerate() {
            let entry = counts.entry(label).or_insert((0, i));
            entry.0 += 1;
        }
        let mut label_order: Vec<String> = counts.keys().map(|s| s.to_string()).collect();
        label_order.sort_by(|a, b| {
            let (ca, fa) = counts[a];
            let (cb, fb) = counts[b];
            cb.cmp(&ca).then(fa.cmp(&fb))
        });
        let index: HashMap<&String, usize> = label_order
            .iter()
            .enumerate()
            .map(|(i, l)| (l, i))
            .collect();
        let labels = raw.iter().map(|l| index[l]).collect();
        Outcome::Categorical {
            name: name.to_string(),
            labels,
            label_order,
        }
    }

    /// Build a survival outcome.
    ///
    /// # Panics
    /// Panics on NaN or negative durations and on length mismatch.
    pub fn survival(name: &str, events: Vec<bool>, durations: Vec<f64>) -> Outcome {
        assert!(
            events.len() == durations.len(),
            "survival outcome '{}': {} events vs {} durations",
            name,
            events.len(),
            durations.len()
        );
        assert!(
            durations.iter().all(|d| d.is_finite() && *d >= 0.0),
            "survival outcome '{}' has an invalid duration",
            name
        );
        Outcome::Survival {
            name: name.to_string(),
            events,
            durations,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Outcome::Categorical { name, .. } => name,
            Outcome::Survival { name, .. } => name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Outcome::Categorical { labels, .. } => labels.len(),
            Outcome::Survival { events, .. } => events.len(),
        }
    }

    pub fn is_survival(&self) -> bool {
        matches!(self, Outcome::Survival { .. })
    }

    /// Number of distinct classes of a categorical outcome.
    ///
    /// # Panics
    /// Panics on a survival outcome.
    pub fn n_classes(&self) -> usize {
        match self {
            Outcome::Categorical { label_order, .. } => label_order.len(),
            Outcome::Survival { name, .. } => {
                panic!("outcome '{}' is survival, classes are undefined", name)
            }
        }
    }

    pub fn subset(&self, rows: &[usize]) -> Outcome {
        match self {
            Outcome::Categorical {
                name,
                labels,
                label_order,
            } => Outcome::Categorical {
                name: name.clone(),
                labels: rows.iter().map(|&r| labels[r]).collect(),
                label_order: label_order.clone(),
            },
            Outcome::Survival {
                name,
                events,
                durations,
            } => Outcome::Survival {
                name: name.clone(),
                events: rows.iter().map(|&r| events[r]).collect(),
                durations: rows.iter().map(|&r| durations[r]).collect(),
            },
        }
    }
}

/// One feature matrix sharing the sample axis with its siblings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub feature_names: Vec<String>,
    pub x: Matrix,
}

/// The engine's input: named views over a shared sample axis plus outcomes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputData {
    pub views: Vec<View>,
    pub outcomes: Vec<Outcome>,
    pub samples: Vec<String>,
    pub nick: String,
    pub stratify_outcome: Option<String>,
}

impl InputData {
    pub fn new(nick: &str) -> InputData {
        InputData {
            views: Vec::new(),
            outcomes: Vec::new(),
            samples: Vec::new(),
            nick: nick.to_string(),
            stratify_outcome: None,
        }
    }

    pub fn sample_len(&self) -> usize {
        self.samples.len()
    }

    pub fn feature_len(&self) -> usize {
        self.views.iter().map(|v| v.x.n_cols()).sum()
    }

    /// Row-count alignment across views and outcomes.
    ///
    /// # Panics
    /// Panics on any mismatch; misaligned inputs are an ingestion bug.
    pub fn assert_consistent(&self) {
        for view in &self.views {
            assert!(
                view.x.n_rows() == self.sample_len(),
                "view '{}' has {} rows but {} samples are declared",
                view.name,
                view.x.n_rows(),
                self.sample_len()
            );
            assert!(
                view.feature_names.len() == view.x.n_cols(),
                "view '{}' names {} features but holds {} columns",
                view.name,
                view.feature_names.len(),
                view.x.n_cols()
            );
        }
        for outcome in &self.outcomes {
            assert!(
                outcome.len() == self.sample_len(),
                "outcome '{}' has {} rows but {} samples are declared",
                outcome.name(),
                outcome.len(),
                self.sample_len()
            );
        }
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.name() == name)
    }

    /// The outcome driving fold stratification: the designated one, else the
    /// first.
    ///
    /// # Panics
    /// Panics when no outcomes exist or the designated name is unknown.
    pub fn stratification_outcome(&self) -> &Outcome {
        match &self.stratify_outcome {
            Some(name) => self
                .outcome(name)
                .unwrap_or_else(|| panic!("stratify outcome '{}' not found", name)),
            None => self
                .outcomes
                .first()
                .unwrap_or_else(|| panic!("dataset '{}' declares no outcomes", self.nick)),
        }
    }

    /// All views concatenated along the feature axis.
    pub fn collapsed_matrix(&self) -> Matrix {
        let blocks: Vec<&Matrix> = self.views.iter().map(|v| &v.x).collect();
        Matrix::hstack(&blocks)
    }

    /// Feature names of the collapsed matrix, prefixed `view:feature`.
    pub fn collapsed_feature_names(&self) -> Vec<String> {
        self.views
            .iter()
            .flat_map(|v| {
                v.feature_names
                    .iter()
                    .map(move |f| format!("{}:{}", v.name, f))
            })
            .collect()
    }

    /// Restrict to the given sample rows, preserving their order.
    pub fn subset(&self, rows: &[usize]) -> InputData {
        InputData {
            views: self
                .views
                .iter()
                .map(|v| View {
                    name: v.name.clone(),
                    feature_names: v.feature_names.clone(),
                    x: v.x.select_rows(rows),
                })
                .collect(),
            outcomes: self.outcomes.iter().map(|o| o.subset(rows)).collect(),
            samples: rows.iter().map(|&r| self.samples[r].clone()).collect(),
            nick: self.nick.clone(),
            stratify_outcome: self.stratify_outcome.clone(),
        }
    }

    /// Same views with the same feature names in the same order.
    pub fn check_compatibility(&self, other: &InputData) -> bool {
        self.views.len() == other.views.len()
            && self
                .views
                .iter()
                .zip(other.views.iter())
                .all(|(a, b)| a.name == b.name && a.feature_names == b.feature_names)
    }

    /// Load views and outcomes from the TSV files named in the configuration.
    ///
    /// View files carry features as rows and samples as columns (first row =
    /// sample names); the outcome file carries samples as rows with one
    /// column per categorical outcome and `<name>_event` / `<name>_time`
    /// columns per survival outcome.
    pub fn load(data_param: &DataParam) -> Result<InputData, Box<dyn Error>> {
        let mut input = InputData::new(&data_param.dataset);
        input.stratify_outcome = if data_param.stratify_outcome.is_empty() {
            None
        } else {
            Some(data_param.stratify_outcome.clone())
        };

        for view_spec in &data_param.views {
            info!("Loading view '{}' from {}...", view_spec.name, view_spec.path);
            let file = File::open(&view_spec.path)?;
            let mut reader = BufReader::new(file);

            let mut first_line = String::new();
            reader.read_line(&mut first_line)?;
            let samples: Vec<String> = first_line
                .trim_end_matches(['\n', '\r'])
                .split('\t')
                .skip(1)
                .map(String::from)
                .collect();
            if input.samples.is_empty() {
                input.samples = samples;
            } else if input.samples != samples {
                return Err(format!(
                    "view '{}' lists different samples than view '{}'",
                    view_spec.name, input.views[0].name
                )
                .into());
            }

            let mut feature_names = Vec::new();
            let mut columns: Vec<Vec<f64>> = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                let mut fields = line.split('\t');
                if let Some(feature_name) = fields.next() {
                    feature_names.push(feature_name.to_string());
                }
                // absent or unparseable cells count as zero abundance
                columns.push(fields.map(|v| v.parse::<f64>().unwrap_or(0.0)).collect());
            }

            let n_samples = input.samples.len();
            let mut x = Matrix::zeros(n_samples, feature_names.len());
            for (j, column) in columns.iter().enumerate() {
                if column.len() != n_samples {
                    return Err(format!(
                        "view '{}' feature '{}' has {} values for {} samples",
                        view_spec.name,
                        feature_names[j],
                        column.len(),
                        n_samples
                    )
                    .into());
                }
                for (i, &value) in column.iter().enumerate() {
                    x.set(i, j, value);
                }
            }
            input.views.push(View {
                name: view_spec.name.clone(),
                feature_names,
                x,
            });
        }

        if !data_param.outcome_file.is_empty() {
            input.load_outcomes(data_param)?;
        }

        input.assert_consistent();
        info!("{}", input);
        Ok(input)
    }

    fn load_outcomes(&mut self, data_param: &DataParam) -> Result<(), Box<dyn Error>> {
        let file = File::open(&data_param.outcome_file)?;
        let mut reader = BufReader::new(file);

        let mut header = String::new();
        reader.read_line(&mut header)?;
        let columns: Vec<String> = header
            .trim_end_matches(['\n', '\r'])
            .split('\t')
            .map(String::from)
            .collect();

        let mut rows: HashMap<String, Vec<String>> = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let fields: Vec<String> = line.split('\t').map(String::from).collect();
            rows.insert(fields[0].clone(), fields);
        }

        let column_index = |name: &str| -> Result<usize, String> {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| format!("outcome column '{}' not found", name))
        };
        let cell = |sample: &String, col: usize| -> Result<String, String> {
            let fields = rows
                .get(sample)
                .ok_or_else(|| format!("no outcome row for sample '{}'", sample))?;
            fields
                .get(col)
                .cloned()
                .ok_or_else(|| format!("sample '{}' misses outcome column {}", sample, col))
        };

        for spec in &data_param.outcomes {
            match spec.kind {
                OutcomeKind::Categorical => {
                    let col = column_index(&spec.name)?;
                    let mut raw = Vec::with_capacity(self.samples.len());
                    for sample in &self.samples {
                        let value = cell(sample, col)?;
                        if value.is_empty() || value == "NA" || value == "NaN" {
                            return Err(format!(
                                "missing '{}' outcome for sample '{}'",
                                spec.name, sample
                            )
                            .into());
                        }
                        raw.push(value);
                    }
                    self.outcomes.push(Outcome::categorical(&spec.name, raw));
                }
                OutcomeKind::Survival => {
                    let event_col = column_index(&format!("{}_event", spec.name))?;
                    let time_col = column_index(&format!("{}_time", spec.name))?;
                    let mut events = Vec::with_capacity(self.samples.len());
                    let mut durations = Vec::with_capacity(self.samples.len());
                    for sample in &self.samples {
                        let event_raw = cell(sample, event_col)?;
                        let event = match event_raw.as_str() {
                            "1" | "true" | "TRUE" => true,
                            "0" | "false" | "FALSE" => false,
                            other => {
                                return Err(format!(
                                    "sample '{}' has unreadable event value '{}'",
                                    sample, other
                                )
                                .into())
                            }
                        };
                        let duration: f64 = cell(sample, time_col)?.parse()?;
                        if !duration.is_finite() || duration < 0.0 {
                            return Err(format!(
                                "sample '{}' has invalid duration {}",
                                sample, duration
                            )
                            .into());
                        }
                        events.push(event);
                        durations.push(duration);
                    }
                    self.outcomes
                        .push(Outcome::survival(&spec.name, events, durations));
                }
            }
        }

        if self.outcomes.is_empty() {
            warn!("outcome file {} yielded no outcomes", data_param.outcome_file);
        }
        Ok(())
    }
}

impl fmt::Display for InputData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let views: Vec<String> = self
            .views
            .iter()
            .map(|v| format!("{}[{}]", v.name, v.x.n_cols()))
            .collect();
        let outcomes: Vec<String> = self
            .outcomes
            .iter()
            .map(|o| {
                if o.is_survival() {
                    format!("{}(survival)", o.name())
                } else {
                    format!("{}({} classes)", o.name(), o.n_classes())
                }
            })
            .collect();
        let samples_string = self.samples.join(",");
        let truncated_samples = if samples_string.len() > 60 {
            format!("{}...", &samples_string[..57])
        } else {
            samples_string
        };
        write!(
            f,
            "Dataset '{}': {} samples [{}], views {}, outcomes {}",
            self.nick,
            self.sample_len(),
            truncated_samples,
            views.join(" "),
            outcomes.join(" ")
        )
    }
}
