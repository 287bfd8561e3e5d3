//! The platform REST client.

use std::io::Read;

use reqwest::blocking::Response;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use fl_mcap::{read_messages, DecodedMessage, DecoderFactory, MessageStream};

use crate::error::ClientError;
use crate::params::{
    AttachmentQuery, CoverageQuery, DataQuery, DeviceUpdate, EventQuery, ImportQuery, NewDevice,
    NewEvent, NewSession, RecordingDataQuery, RecordingQuery, SessionUpdate, TopicQuery,
    UploadRequest,
};
use crate::progress::ProgressReader;
use crate::records::{
    Attachment, Coverage, Device, Event, Import, Project, Recording, Session, Topic, UploadResult,
};

pub const DEFAULT_HOST: &str = "https://api.fleetlog.dev";

/// Download chunk size; progress callbacks fire once per chunk.
const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;

/// Cumulative-bytes progress callback for downloads.
pub type DownloadProgress<'a> = &'a mut dyn FnMut(u64);

#[derive(Deserialize)]
struct SignedLink {
    link: String,
}

/// An authenticated client for the platform API.
///
/// All calls are blocking; the client holds a connection pool and is
/// cheap to clone.
#[derive(Clone)]
pub struct Client {
    host: String,
    http: reqwest::blocking::Client,
}

impl Client {
    /// A client for the default platform host.
    pub fn new(token: &str) -> Result<Self, ClientError> {
        Self::with_host(token, DEFAULT_HOST)
    }

    /// A client for a specific host, e.g. a self-hosted deployment.
    /// `host` includes the scheme: `https://api.example.com`.
    pub fn with_host(token: &str, host: impl Into<String>) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::InvalidArgument("token is not a valid header value".to_owned()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            host: host.into(),
            http: reqwest::blocking::Client::builder()
                .default_headers(headers)
                .build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    // --- Events ---

    /// Creates an event. Omitting `end` creates an instantaneous event
    /// with `end == start`.
    pub fn create_event(&self, mut event: NewEvent) -> Result<Event, ClientError> {
        require_device_selector(event.device_id.as_deref(), event.device_name.as_deref())?;
        if event.start.is_none() {
            return Err(ClientError::InvalidArgument("start is required".to_owned()));
        }
        if event.end.is_none() {
            event.end = event.start;
        }
        json_or_raise(self.http.post(self.url("/v1/events")).json(&event).send()?)
    }

    pub fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>, ClientError> {
        json_or_raise(self.http.get(self.url("/v1/events")).query(query).send()?)
    }

    pub fn delete_event(&self, event_id: &str) -> Result<(), ClientError> {
        ok_or_raise(
            self.http
                .delete(self.url(&format!("/v1/events/{event_id}")))
                .send()?,
        )
    }

    // --- Devices ---

    /// Gets a single device by id or name (mutually exclusive).
    pub fn get_device(
        &self,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<Device, ClientError> {
        let selector = device_selector(device_id, device_name)?;
        json_or_raise(
            self.http
                .get(self.url(&format!("/v1/devices/{selector}")))
                .send()?,
        )
    }

    pub fn get_devices(&self, project_id: Option<&str>) -> Result<Vec<Device>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/devices"))
                .query(&project_id_query(project_id))
                .send()?,
        )
    }

    pub fn create_device(&self, device: &NewDevice) -> Result<Device, ClientError> {
        json_or_raise(self.http.post(self.url("/v1/devices")).json(device).send()?)
    }

    pub fn update_device(
        &self,
        device_id: Option<&str>,
        device_name: Option<&str>,
        update: &DeviceUpdate,
    ) -> Result<Device, ClientError> {
        let selector = device_selector(device_id, device_name)?;
        json_or_raise(
            self.http
                .patch(self.url(&format!("/v1/devices/{selector}")))
                .json(update)
                .send()?,
        )
    }

    /// Deletes a device. Its recordings must be deleted first.
    pub fn delete_device(
        &self,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> Result<(), ClientError> {
        let selector = device_selector(device_id, device_name)?;
        ok_or_raise(
            self.http
                .delete(self.url(&format!("/v1/devices/{selector}")))
                .send()?,
        )
    }

    // --- Recordings, attachments, imports ---

    pub fn get_recordings(&self, query: &RecordingQuery) -> Result<Vec<Recording>, ClientError> {
        json_or_raise(self.http.get(self.url("/v1/recordings")).query(query).send()?)
    }

    pub fn delete_recording(&self, recording_id: &str) -> Result<(), ClientError> {
        ok_or_raise(
            self.http
                .delete(self.url(&format!("/v1/recordings/{recording_id}")))
                .send()?,
        )
    }

    pub fn get_attachments(&self, query: &AttachmentQuery) -> Result<Vec<Attachment>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/recording-attachments"))
                .query(query)
                .send()?,
        )
    }

    /// Downloads an attachment's raw bytes.
    pub fn download_attachment(
        &self,
        attachment_id: &str,
        progress: Option<DownloadProgress<'_>>,
    ) -> Result<Vec<u8>, ClientError> {
        self.download_with_progress(
            &self.url(&format!("/v1/recording-attachments/{attachment_id}/download")),
            progress,
        )
    }

    #[deprecated(note = "use `get_recordings` with `import_status: \"complete\"` instead")]
    pub fn get_imports(&self, query: &ImportQuery) -> Result<Vec<Import>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/data/imports"))
                .query(query)
                .send()?,
        )
    }

    #[deprecated(note = "use `delete_recording` instead")]
    pub fn delete_import(&self, import_id: &str) -> Result<(), ClientError> {
        ok_or_raise(
            self.http
                .delete(self.url(&format!("/v1/data/imports/{import_id}")))
                .send()?,
        )
    }

    // --- Sessions and projects ---

    pub fn get_sessions(&self, project_id: Option<&str>) -> Result<Vec<Session>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/sessions"))
                .query(&project_id_query(project_id))
                .send()?,
        )
    }

    /// Gets a session by id or key.
    pub fn get_session(
        &self,
        session_id_or_key: &str,
        project_id: Option<&str>,
    ) -> Result<Session, ClientError> {
        json_or_raise(
            self.http
                .get(self.url(&format!("/v1/sessions/{session_id_or_key}")))
                .query(&project_id_query(project_id))
                .send()?,
        )
    }

    pub fn create_session(&self, session: &NewSession) -> Result<Session, ClientError> {
        json_or_raise(self.http.post(self.url("/v1/sessions")).json(session).send()?)
    }

    pub fn update_session(
        &self,
        session_id: &str,
        project_id: Option<&str>,
        update: &SessionUpdate,
    ) -> Result<Session, ClientError> {
        json_or_raise(
            self.http
                .patch(self.url(&format!("/v1/sessions/{session_id}")))
                .query(&project_id_query(project_id))
                .json(update)
                .send()?,
        )
    }

    pub fn delete_session(
        &self,
        session_id: &str,
        project_id: Option<&str>,
    ) -> Result<(), ClientError> {
        ok_or_raise(
            self.http
                .delete(self.url(&format!("/v1/sessions/{session_id}")))
                .query(&project_id_query(project_id))
                .send()?,
        )
    }

    pub fn get_projects(&self) -> Result<Vec<Project>, ClientError> {
        json_or_raise(self.http.get(self.url("/v1/projects")).send()?)
    }

    // --- Coverage and topics ---

    pub fn get_coverage(&self, query: &CoverageQuery) -> Result<Vec<Coverage>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/data/coverage"))
                .query(query)
                .send()?,
        )
    }

    /// Lists topics recorded in a time range. Schemas are included
    /// only when `query.include_schemas` is set.
    pub fn get_topics(&self, query: &TopicQuery) -> Result<Vec<Topic>, ClientError> {
        json_or_raise(
            self.http
                .get(self.url("/v1/data/topics"))
                .query(query)
                .send()?,
        )
    }

    // --- Data transfer ---

    /// Requests a signed download link for the selected data.
    fn make_stream_link<Q: serde::Serialize>(&self, query: &Q) -> Result<String, ClientError> {
        let signed: SignedLink =
            json_or_raise(self.http.post(self.url("/v1/data/stream")).json(query).send()?)?;
        Ok(signed.link)
    }

    /// Opens the live download stream for the selected data. The
    /// returned reader yields bytes as they arrive.
    pub fn open_download_stream(&self, query: &DataQuery) -> Result<impl Read, ClientError> {
        require_device_selector(query.device_id.as_deref(), query.device_name.as_deref())?;
        let link = self.make_stream_link(query)?;
        self.open_link(&link)
    }

    /// Downloads the selected data into memory, reporting cumulative
    /// progress per chunk.
    pub fn download_data(
        &self,
        query: &DataQuery,
        progress: Option<DownloadProgress<'_>>,
    ) -> Result<Vec<u8>, ClientError> {
        require_device_selector(query.device_id.as_deref(), query.device_name.as_deref())?;
        let link = self.make_stream_link(query)?;
        self.download_with_progress(&link, progress)
    }

    /// Downloads one recording's data by id or key.
    pub fn download_recording_data(
        &self,
        query: &RecordingDataQuery,
        progress: Option<DownloadProgress<'_>>,
    ) -> Result<Vec<u8>, ClientError> {
        if query.id.is_none() && query.key.is_none() {
            return Err(ClientError::InvalidArgument(
                "id or key must be provided".to_owned(),
            ));
        }
        let link = self.make_stream_link(query)?;
        self.download_with_progress(&link, progress)
    }

    /// Streams decoded messages for the selected data.
    ///
    /// Messages are yielded as their bytes arrive; nothing waits for
    /// the download to finish. `factories` replaces the built-in
    /// decoders when given.
    pub fn iter_messages(
        &self,
        query: &DataQuery,
        factories: Option<Vec<Box<dyn DecoderFactory>>>,
    ) -> Result<MessageStream<impl Read>, ClientError> {
        let stream = self.open_download_stream(query)?;
        Ok(match factories {
            Some(factories) => MessageStream::with_factories(stream, factories),
            None => MessageStream::new(stream),
        })
    }

    /// Downloads and decodes all messages for the selected data.
    #[deprecated(note = "use `iter_messages` instead")]
    pub fn get_messages(
        &self,
        query: &DataQuery,
        factories: Option<Vec<Box<dyn DecoderFactory>>>,
    ) -> Result<Vec<DecodedMessage>, ClientError> {
        let data = self.download_data(query, None)?;
        let stream = match factories {
            Some(factories) => {
                MessageStream::with_factories(std::io::Cursor::new(data), factories)
            }
            None => read_messages(std::io::Cursor::new(data)),
        };
        Ok(stream.collect::<Result<_, _>>()?)
    }

    /// Uploads a recording: requests a signed link, then PUTs the
    /// payload to it. Wrap the payload in a
    /// [`ProgressReader::with_callback`] to observe upload progress.
    pub fn upload_data<R: Read + Send + 'static>(
        &self,
        request: &UploadRequest,
        data: ProgressReader<R>,
    ) -> Result<UploadResult, ClientError> {
        let link = {
            let signed: SignedLink = json_or_raise(
                self.http
                    .post(self.url("/v1/data/upload"))
                    .json(request)
                    .send()?,
            )?;
            signed.link
        };
        log::debug!("Uploading {:?} to signed link", request.filename);

        let body = match data.total() {
            Some(total) => reqwest::blocking::Body::sized(data, total),
            None => reqwest::blocking::Body::new(data),
        };
        let response = self
            .http
            .put(&link)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()?;

        Ok(UploadResult {
            link,
            code: response.status().as_u16(),
            text: response.text()?,
        })
    }

    fn open_link(&self, link: &str) -> Result<Response, ClientError> {
        let response = self.http.get(link).send()?;
        raise_for_status(response.status())?;
        Ok(response)
    }

    fn download_with_progress(
        &self,
        link: &str,
        mut progress: Option<DownloadProgress<'_>>,
    ) -> Result<Vec<u8>, ClientError> {
        let mut response = self.open_link(link)?;

        let mut data = Vec::new();
        let mut chunk = vec![0; DOWNLOAD_CHUNK_SIZE];
        loop {
            let n = response.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
            if let Some(progress) = progress.as_mut() {
                progress(data.len() as u64);
            }
        }
        log::debug!("Downloaded {} bytes", data.len());
        Ok(data)
    }
}

/// Parses a JSON response, or fails with the server's error message
/// for 4xx responses.
fn json_or_raise<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_client_error() {
        let message = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|body| Some(body.get("error")?.as_str()?.to_owned()))
            .unwrap_or_else(|| canonical_reason(status));
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }
    raise_for_status(status)?;
    Ok(response.json()?)
}

fn ok_or_raise(response: Response) -> Result<(), ClientError> {
    json_or_raise::<serde_json::Value>(response).map(|_| ())
}

fn raise_for_status(status: StatusCode) -> Result<(), ClientError> {
    if status.is_client_error() || status.is_server_error() {
        return Err(ClientError::Api {
            status: status.as_u16(),
            message: canonical_reason(status),
        });
    }
    Ok(())
}

fn canonical_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_owned()
}

fn device_selector<'a>(
    device_id: Option<&'a str>,
    device_name: Option<&'a str>,
) -> Result<&'a str, ClientError> {
    if device_id.is_some() && device_name.is_some() {
        return Err(ClientError::InvalidArgument(
            "device_id and device_name are mutually exclusive".to_owned(),
        ));
    }
    // The API accepts either in the path.
    device_name.or(device_id).ok_or_else(|| {
        ClientError::InvalidArgument("device_id or device_name must be provided".to_owned())
    })
}

fn require_device_selector(
    device_id: Option<&str>,
    device_name: Option<&str>,
) -> Result<(), ClientError> {
    if device_id.is_none() && device_name.is_none() {
        return Err(ClientError::InvalidArgument(
            "device_id or device_name must be provided".to_owned(),
        ));
    }
    Ok(())
}

fn project_id_query(project_id: Option<&str>) -> Vec<(&'static str, &str)> {
    project_id
        .map(|project_id| vec![("projectId", project_id)])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_selector_rules() {
        assert_eq!(device_selector(Some("id"), None).unwrap(), "id");
        assert_eq!(device_selector(None, Some("name")).unwrap(), "name");
        assert!(device_selector(Some("id"), Some("name")).is_err());
        assert!(device_selector(None, None).is_err());
    }
}
