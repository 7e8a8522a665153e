use crate::engine::types::ParamSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 網格規格解析錯誤
#[derive(Error, Debug)]
pub enum GridParseError {
    #[error("網格規格為空")]
    Empty,

    #[error("無效的網格維度 '{0}'，格式應為 name=start:stop:step")]
    InvalidDimension(String),

    #[error("無效的網格數值 '{0}'")]
    InvalidNumber(String),

    #[error("維度 '{name}' 範圍無效: start={start}, stop={stop}, step={step}")]
    InvalidRange {
        name: String,
        start: i64,
        stop: i64,
        step: i64,
    },

    #[error("維度 '{0}' 重複")]
    DuplicateDimension(String),
}

/// 單一參數的整數範圍（含端點）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimension {
    pub name: String,
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl GridDimension {
    fn values(&self) -> Vec<i64> {
        let mut out = Vec::new();
        let mut v = self.start;
        while v <= self.stop {
            out.push(v);
            v += self.step;
        }
        out
    }

    fn len(&self) -> usize {
        ((self.stop - self.start) / self.step + 1).max(0) as usize
    }
}

/// 參數搜索空間的宣告式描述
///
/// 文字格式 `fast=5:10:1,slow=20:20:1`；step 省略時視為 1。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    dims: Vec<GridDimension>,
}

impl GridSpec {
    /// 解析網格規格字串
    pub fn parse(spec: &str) -> Result<Self, GridParseError> {
        let mut dims = Vec::new();

        for item in spec.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (name, range) = item
                .split_once('=')
                .ok_or_else(|| GridParseError::InvalidDimension(item.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(GridParseError::InvalidDimension(item.to_string()));
            }

            let parts: Vec<&str> = range.split(':').map(str::trim).collect();
            let (start, stop, step) = match parts.as_slice() {
                [start, stop] => (parse_num(start)?, parse_num(stop)?, 1),
                [start, stop, step] => (parse_num(start)?, parse_num(stop)?, parse_num(step)?),
                _ => return Err(GridParseError::InvalidDimension(item.to_string())),
            };

            if step < 1 || stop < start {
                return Err(GridParseError::InvalidRange {
                    name: name.to_string(),
                    start,
                    stop,
                    step,
                });
            }

            if dims.iter().any(|d: &GridDimension| d.name == name) {
                return Err(GridParseError::DuplicateDimension(name.to_string()));
            }

            dims.push(GridDimension {
                name: name.to_string(),
                start,
                stop,
                step,
            });
        }

        if dims.is_empty() {
            return Err(GridParseError::Empty);
        }

        // 維度按名稱字典序固定，列舉順序與宣告順序無關
        dims.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self { dims })
    }

    pub fn dimensions(&self) -> &[GridDimension] {
        &self.dims
    }

    /// 候選組合總數（未經約束過濾）
    pub fn candidate_count(&self) -> usize {
        self.dims.iter().map(GridDimension::len).product()
    }

    /// 列舉全部候選參數組（笛卡兒積）
    ///
    /// 列舉順序固定且已文件化：參數名字典序，值升序，最右側參數
    /// 變動最快。下游「第一個遇到的最大值」平手裁決因此可重現。
    pub fn candidates(&self) -> Vec<ParamSet> {
        let value_lists: Vec<Vec<i64>> = self.dims.iter().map(GridDimension::values).collect();
        let total = self.candidate_count();
        let mut out = Vec::with_capacity(total);
        if total == 0 {
            return out;
        }

        let mut indices = vec![0usize; self.dims.len()];
        loop {
            let mut params = ParamSet::new();
            for (pos, dim) in self.dims.iter().enumerate() {
                params.insert(
                    dim.name.clone(),
                    serde_json::json!(value_lists[pos][indices[pos]]),
                );
            }
            out.push(params);

            // 最右側參數變動最快
            let mut pos = self.dims.len();
            loop {
                if pos == 0 {
                    return out;
                }
                pos -= 1;
                indices[pos] += 1;
                if indices[pos] < value_lists[pos].len() {
                    break;
                }
                indices[pos] = 0;
            }
        }
    }
}

fn parse_num(s: &str) -> Result<i64, GridParseError> {
    s.parse::<i64>()
        .map_err(|_| GridParseError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_dimensions() {
        let grid = GridSpec::parse("fast=5:10:1,slow=20:20:1").unwrap();
        assert_eq!(grid.dimensions().len(), 2);
        assert_eq!(grid.candidate_count(), 6);
    }

    #[test]
    fn test_step_defaults_to_one() {
        let grid = GridSpec::parse("fast=1:3").unwrap();
        assert_eq!(grid.candidate_count(), 3);
    }

    #[test]
    fn test_candidates_are_lexicographic_rightmost_fastest() {
        // 宣告順序相反也不影響列舉順序
        let grid = GridSpec::parse("slow=20:21:1,fast=5:6:1").unwrap();
        let candidates = grid.candidates();
        let flat: Vec<(i64, i64)> = candidates
            .iter()
            .map(|c| (c["fast"].as_i64().unwrap(), c["slow"].as_i64().unwrap()))
            .collect();
        assert_eq!(flat, vec![(5, 20), (5, 21), (6, 20), (6, 21)]);
    }

    #[test]
    fn test_invalid_specs_rejected() {
        assert!(matches!(GridSpec::parse(""), Err(GridParseError::Empty)));
        assert!(GridSpec::parse("fast").is_err());
        assert!(GridSpec::parse("fast=10:5:1").is_err());
        assert!(GridSpec::parse("fast=1:5:0").is_err());
        assert!(GridSpec::parse("fast=a:5:1").is_err());
        assert!(matches!(
            GridSpec::parse("fast=1:2,fast=3:4"),
            Err(GridParseError::DuplicateDimension(_))
        ));
    }

    #[test]
    fn test_single_point_dimension() {
        let grid = GridSpec::parse("slow=20:20:1").unwrap();
        assert_eq!(grid.candidate_count(), 1);
        assert_eq!(grid.candidates()[0]["slow"].as_i64(), Some(20));
    }
}
