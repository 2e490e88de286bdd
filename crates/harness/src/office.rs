use std::path::PathBuf;

use pricebook_core::BaseRow;
use pricebook_engine::EditorConfig;
use tempfile::TempDir;

use crate::TestDesk;

/// Several operators editing the same catalog through one on-disk database.
pub struct TestOffice {
    _dir: TempDir,
    db_path: PathBuf,
    base_rows: Vec<BaseRow>,
    desks: Vec<TestDesk>,
}

impl TestOffice {
    pub fn new(base_rows: Vec<BaseRow>) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("pricebook.db");
        Ok(Self {
            _dir: dir,
            db_path,
            base_rows,
            desks: Vec::new(),
        })
    }

    pub fn add_desk(&mut self, operator: &str) -> Result<usize, Box<dyn std::error::Error>> {
        self.add_desk_with(operator, EditorConfig::default())
    }

    pub fn add_desk_with(
        &mut self,
        operator: &str,
        config: EditorConfig,
    ) -> Result<usize, Box<dyn std::error::Error>> {
        let path = self.db_path.to_str().ok_or("database path is not valid UTF-8")?;
        let desk = TestDesk::open(path, operator, config, self.base_rows.clone())?;
        let index = self.desks.len();
        self.desks.push(desk);
        Ok(index)
    }

    pub fn desk(&self, index: usize) -> &TestDesk {
        &self.desks[index]
    }

    pub fn desk_mut(&mut self, index: usize) -> &mut TestDesk {
        &mut self.desks[index]
    }

    /// Two desks at once, for interleaving edits.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut TestDesk, &mut TestDesk) {
        assert_ne!(a, b, "pair_mut needs two distinct desks");
        if a < b {
            let (left, right) = self.desks.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.desks.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    pub fn base_rows(&self) -> &[BaseRow] {
        &self.base_rows
    }
}
