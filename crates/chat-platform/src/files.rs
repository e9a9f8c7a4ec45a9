//! Browser `File` objects as core `FileSource`s.

use std::rc::Rc;
use async_trait::async_trait;
use js_sys::Uint8Array;
use wasm_bindgen_futures::JsFuture;
use web_sys::{ClipboardEvent, DataTransfer, File, FileList};

use chat_core::ports::FileSource;
use chat_types::{ChatError, Result};

pub struct BrowserFile {
    file: File,
}

impl BrowserFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait(?Send)]
impl FileSource for BrowserFile {
    fn name(&self) -> String {
        self.file.name()
    }

    fn size(&self) -> u64 {
        self.file.size() as u64
    }

    fn media_type(&self) -> String {
        self.file.type_()
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        let buffer = JsFuture::from(self.file.array_buffer())
            .await
            .map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
        Ok(Uint8Array::new(&buffer).to_vec())
    }
}

/// Every file of an `<input type="file">` selection, in order.
pub fn files_from_list(list: &FileList) -> Vec<Rc<dyn FileSource>> {
    (0..list.length())
        .filter_map(|i| list.get(i))
        .map(|f| Rc::new(BrowserFile::new(f)) as Rc<dyn FileSource>)
        .collect()
}

/// Files carried by a paste event. Pasted plain text yields nothing.
pub fn files_from_clipboard(event: &ClipboardEvent) -> Vec<Rc<dyn FileSource>> {
    event
        .clipboard_data()
        .map(|data| files_from_transfer(&data))
        .unwrap_or_default()
}

fn files_from_transfer(data: &DataTransfer) -> Vec<Rc<dyn FileSource>> {
    let items = data.items();
    (0..items.length())
        .filter_map(|i| items.get(i))
        .filter(|item| item.kind() == "file")
        .filter_map(|item| item.get_as_file().ok().flatten())
        .map(|f| Rc::new(BrowserFile::new(f)) as Rc<dyn FileSource>)
        .collect()
}
