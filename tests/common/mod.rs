//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// A small clinic procedures document, one topic per paragraph.
pub const SOP_TEXT: &str = "\
Greeting: Answer every call within three rings. Thank the caller for calling WellStreet Urgent Care, give your name, and ask how you may help.

Scheduling: All appointments are scheduled through our website. Offer to text or email the scheduling link to the caller. Availability cannot be checked over the phone.

Cancellation: Callers may cancel an appointment through the link in their confirmation message. Confirm the cancellation and offer to help them book a new visit.

Reschedule: To change an appointment, the caller cancels the existing booking online and selects a new time on the website.

Walk-ins: We accept walk-in patients every day during clinic hours. No appointment is needed to walk in. Walk-in patients are seen in order of arrival and medical need.

Directions: The clinic is located at 100 Main Street, next to the pharmacy. Free parking is available behind the building.

Wait times: Current wait times are shown on our website and change throughout the day. Never promise a specific wait time.

Late arrival: Patients who arrive more than 15 minutes late for an appointment may be asked to reschedule or wait to be seen as a walk-in.

Online booking: Patients can book online at any time using the scheduling page on our website, which shows all open time slots.

Hold: Always ask permission before placing a caller on hold and check back every two minutes.

Communication: Use a warm, calm, professional tone. Keep answers short and avoid medical jargon.

Closing: Before ending the call, ask if there is anything else you can help with, then thank the caller and say goodbye.
";

/// Write the SOP document and a hashing-embedder config under `root`.
/// Returns the config path.
pub fn setup(root: &Path) -> PathBuf {
    let data = root.join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("sop.txt"), SOP_TEXT).unwrap();

    let config_path = root.join("sop-agent.toml");
    let config = format!(
        r#"[index]
dir = "{index}"
data_dir = "{data}"

[chunking]
chunk_size = 500
chunk_overlap = 100

[retrieval]
top_k = 3

[embedding]
provider = "hashing"
dims = 384
init_retry_delay_secs = 0

[logging]
level = "warn"
"#,
        index = root.join("index").display().to_string().replace('\\', "/"),
        data = data.display().to_string().replace('\\', "/"),
    );
    fs::write(&config_path, config).unwrap();
    config_path
}

/// A .docx holding one paragraph per entry of `paragraphs`.
pub fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}
