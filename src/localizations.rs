use i18n_embed::DesktopLanguageRequester;
use log::debug;
use std::collections::HashMap;
use unic_langid::{langid, LanguageIdentifier};

const FALLBACK_LANG: LanguageIdentifier = langid!("en-US");

// Simple in-memory translations
#[derive(Default)]
pub struct Translations {
    strings: HashMap<&'static str, &'static str>,
}

impl Translations {
    fn from_pairs(pairs: &[(&'static str, &'static str)]) -> Self {
        Self {
            strings: pairs.iter().copied().collect(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&'static str> {
        self.strings.get(key).copied()
    }
}

const EN_US: &[(&str, &str)] = &[
    ("app-title", "YouTube Downloader"),
    ("app-subtitle", "Download videos in high quality"),
    ("url-label", "Video URL:"),
    ("url-placeholder", "Paste a video URL here..."),
    ("download-to", "Save to:"),
    ("browse-button", "Browse..."),
    ("quality-label", "Quality:"),
    ("load-formats", "Load qualities"),
    ("playlist-checkbox", "Download the whole playlist"),
    ("download-button", "Download"),
    ("cancel-button", "Cancel"),
    ("open-folder-button", "Open folder"),
    ("update-button", "Update yt-dlp"),
    ("status-ready", "Ready"),
    ("status-checking", "Checking video..."),
    ("status-loading-formats", "Looking up available qualities..."),
    ("status-formats-loaded", "{count} qualities available"),
    ("status-starting", "Starting download..."),
    ("status-downloading", "Downloading: {percent}%"),
    ("status-processing", "Processing video..."),
    ("status-complete", "Download complete: {title}"),
    ("status-cancelled", "Download cancelled"),
    ("status-cancelling", "Cancelling..."),
    ("status-updating", "Updating yt-dlp..."),
    ("status-opening-existing", "Opening existing file..."),
    ("progress-speed", "Speed: {speed}"),
    ("progress-eta", "Time left: {eta}"),
    ("saved-to", "Saved to: {path}"),
    ("error-prefix", "Error: {message}"),
    ("error-no-url", "Please enter a video URL"),
    ("error-invalid-url", "Please enter a valid URL"),
    ("error-invalid-dir", "The download folder can't be created"),
    ("error-ytdlp-missing", "yt-dlp not found. Please install it and make sure it's in your PATH."),
    ("error-open-folder", "Could not open the folder. Please navigate manually."),
    ("overwrite-title", "File already exists"),
    ("overwrite-body", "The video '{title}' already exists in this folder. Download it again?"),
    ("overwrite-yes", "Overwrite"),
    ("overwrite-open", "Open existing file"),
    ("cancel", "Cancel"),
    ("history-title", "History"),
    ("history-empty", "No downloads yet"),
    ("history-refresh", "Refresh"),
    ("history-clear", "Clear"),
    ("history-locate", "Show in folder"),
    ("history-delete", "Delete"),
    ("delete-title", "Confirm deletion"),
    ("delete-body", "Delete this video? The file will be permanently removed from disk."),
    ("delete-confirm", "Delete"),
    ("ffmpeg-title", "FFmpeg required"),
    ("ffmpeg-body", "FFmpeg is needed to merge and convert downloads. Install it automatically? (~80MB download)"),
    ("ffmpeg-install", "Install"),
    ("ffmpeg-skip", "Not now"),
    ("ffmpeg-installing", "Installing FFmpeg"),
    ("ffmpeg-installed", "FFmpeg installed successfully!"),
    ("ffmpeg-failed", "FFmpeg could not be installed automatically. Some videos may not download correctly."),
    ("ffmpeg-skipped", "Without FFmpeg some videos may not download correctly."),
];

const PT_BR: &[(&str, &str)] = &[
    ("app-title", "YouTube Downloader"),
    ("app-subtitle", "Baixe vídeos em alta qualidade"),
    ("url-label", "URL do vídeo:"),
    ("url-placeholder", "Cole a URL do vídeo aqui..."),
    ("download-to", "Salvar em:"),
    ("browse-button", "Procurar..."),
    ("quality-label", "Qualidade:"),
    ("load-formats", "Carregar qualidades"),
    ("playlist-checkbox", "Baixar a playlist inteira"),
    ("download-button", "Baixar"),
    ("cancel-button", "Cancelar"),
    ("open-folder-button", "Abrir pasta"),
    ("update-button", "Atualizar yt-dlp"),
    ("status-ready", "Pronto"),
    ("status-checking", "Verificando vídeo..."),
    ("status-loading-formats", "Buscando qualidades disponíveis..."),
    ("status-formats-loaded", "{count} qualidades disponíveis"),
    ("status-starting", "Iniciando download..."),
    ("status-downloading", "Baixando: {percent}%"),
    ("status-processing", "Processando vídeo..."),
    ("status-complete", "Download concluído: {title}"),
    ("status-cancelled", "Download cancelado"),
    ("status-cancelling", "Cancelando..."),
    ("status-updating", "Atualizando yt-dlp..."),
    ("status-opening-existing", "Abrindo arquivo existente..."),
    ("progress-speed", "Velocidade: {speed}"),
    ("progress-eta", "Tempo restante: {eta}"),
    ("saved-to", "Salvo em: {path}"),
    ("error-prefix", "Erro: {message}"),
    ("error-no-url", "Informe a URL de um vídeo"),
    ("error-invalid-url", "Informe uma URL válida"),
    ("error-invalid-dir", "Não foi possível criar a pasta de download"),
    ("error-ytdlp-missing", "yt-dlp não encontrado. Instale-o e verifique se está no PATH."),
    ("error-open-folder", "Não foi possível abrir a pasta. Navegue até ela manualmente."),
    ("overwrite-title", "Arquivo já existe"),
    ("overwrite-body", "O vídeo '{title}' já existe nesta pasta. Deseja baixar novamente?"),
    ("overwrite-yes", "Sobrescrever"),
    ("overwrite-open", "Abrir arquivo existente"),
    ("cancel", "Cancelar"),
    ("history-title", "Histórico"),
    ("history-empty", "Nenhum download ainda"),
    ("history-refresh", "Atualizar"),
    ("history-clear", "Limpar"),
    ("history-locate", "Mostrar na pasta"),
    ("history-delete", "Excluir"),
    ("delete-title", "Confirmar exclusão"),
    ("delete-body", "Tem certeza que deseja excluir este vídeo? O arquivo será removido permanentemente do disco."),
    ("delete-confirm", "Excluir"),
    ("ffmpeg-title", "FFmpeg necessário"),
    ("ffmpeg-body", "O FFmpeg é necessário para baixar vídeos. Deseja instalar automaticamente? (~80MB de download)"),
    ("ffmpeg-install", "Instalar"),
    ("ffmpeg-skip", "Agora não"),
    ("ffmpeg-installing", "Instalando FFmpeg"),
    ("ffmpeg-installed", "FFmpeg instalado com sucesso!"),
    ("ffmpeg-failed", "Não foi possível instalar o FFmpeg automaticamente. Alguns vídeos podem não ser baixados corretamente."),
    ("ffmpeg-skipped", "Sem o FFmpeg, alguns vídeos podem não ser baixados corretamente."),
];

const ES_ES: &[(&str, &str)] = &[
    ("app-title", "Descargador de YouTube"),
    ("app-subtitle", "Descarga videos en alta calidad"),
    ("url-label", "URL del video:"),
    ("url-placeholder", "Pegue la URL del video aquí..."),
    ("download-to", "Guardar en:"),
    ("browse-button", "Examinar..."),
    ("quality-label", "Calidad:"),
    ("load-formats", "Cargar calidades"),
    ("playlist-checkbox", "Descargar toda la lista"),
    ("download-button", "Descargar"),
    ("cancel-button", "Cancelar"),
    ("open-folder-button", "Abrir carpeta"),
    ("update-button", "Actualizar yt-dlp"),
    ("status-ready", "Listo"),
    ("status-checking", "Verificando video..."),
    ("status-loading-formats", "Buscando calidades disponibles..."),
    ("status-formats-loaded", "{count} calidades disponibles"),
    ("status-starting", "Iniciando descarga..."),
    ("status-downloading", "Descargando: {percent}%"),
    ("status-processing", "Procesando video..."),
    ("status-complete", "Descarga completada: {title}"),
    ("status-cancelled", "Descarga cancelada"),
    ("status-cancelling", "Cancelando..."),
    ("status-updating", "Actualizando yt-dlp..."),
    ("status-opening-existing", "Abriendo archivo existente..."),
    ("progress-speed", "Velocidad: {speed}"),
    ("progress-eta", "Tiempo restante: {eta}"),
    ("saved-to", "Guardado en: {path}"),
    ("error-prefix", "Error: {message}"),
    ("error-no-url", "Ingrese la URL de un video"),
    ("error-invalid-url", "Error: URL inválida"),
    ("error-invalid-dir", "No se pudo crear la carpeta de descarga"),
    ("error-ytdlp-missing", "No se encontró yt-dlp. Por favor instale yt-dlp y asegúrese de que esté en su PATH."),
    ("error-open-folder", "No se pudo abrir la carpeta. Navegue manualmente."),
    ("overwrite-title", "El archivo ya existe"),
    ("overwrite-body", "El video '{title}' ya existe en esta carpeta. ¿Descargarlo de nuevo?"),
    ("overwrite-yes", "Sobrescribir"),
    ("overwrite-open", "Abrir archivo existente"),
    ("cancel", "Cancelar"),
    ("history-title", "Historial"),
    ("history-empty", "Aún no hay descargas"),
    ("history-refresh", "Actualizar"),
    ("history-clear", "Limpiar"),
    ("history-locate", "Mostrar en carpeta"),
    ("history-delete", "Eliminar"),
    ("delete-title", "Confirmar eliminación"),
    ("delete-body", "¿Eliminar este video? El archivo se borrará permanentemente del disco."),
    ("delete-confirm", "Eliminar"),
    ("ffmpeg-title", "Se necesita FFmpeg"),
    ("ffmpeg-body", "FFmpeg es necesario para descargar videos. ¿Instalarlo automáticamente? (~80MB de descarga)"),
    ("ffmpeg-install", "Instalar"),
    ("ffmpeg-skip", "Ahora no"),
    ("ffmpeg-installing", "Instalando FFmpeg"),
    ("ffmpeg-installed", "¡FFmpeg instalado correctamente!"),
    ("ffmpeg-failed", "No se pudo instalar FFmpeg automáticamente. Algunos videos podrían no descargarse correctamente."),
    ("ffmpeg-skipped", "Sin FFmpeg algunos videos podrían no descargarse correctamente."),
];

pub struct Localizations {
    translations: HashMap<LanguageIdentifier, Translations>,
    current_lang: LanguageIdentifier,
}

impl Default for Localizations {
    fn default() -> Self {
        Self::new()
    }
}

impl Localizations {
    /// Picks the first desktop language we have strings for.
    pub fn new() -> Self {
        let mut localizer = Self::with_language(&FALLBACK_LANG);
        for requested in DesktopLanguageRequester::requested_languages() {
            if localizer.select(&requested) {
                break;
            }
        }
        debug!("UI language: {}", localizer.current_lang());
        localizer
    }

    pub fn with_language(lang: &LanguageIdentifier) -> Self {
        let mut translations = HashMap::new();
        translations.insert(FALLBACK_LANG, Translations::from_pairs(EN_US));
        translations.insert(langid!("pt-BR"), Translations::from_pairs(PT_BR));
        translations.insert(langid!("es-ES"), Translations::from_pairs(ES_ES));

        let mut localizer = Self {
            translations,
            current_lang: FALLBACK_LANG,
        };
        localizer.select(lang);
        localizer
    }

    pub fn current_lang(&self) -> &LanguageIdentifier {
        &self.current_lang
    }

    /// Looks `key` up in the current language, falling back to English, and
    /// fills `{name}` placeholders from `args`.
    pub fn lookup_single_language(&self, key: &str, args: Option<&[(&str, &str)]>) -> Option<String> {
        let template = self
            .translations
            .get(&self.current_lang)
            .and_then(|t| t.lookup(key))
            .or_else(|| self.translations.get(&FALLBACK_LANG).and_then(|t| t.lookup(key)))?;

        let mut text = template.to_string();
        for (name, value) in args.unwrap_or_default() {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        Some(text)
    }

    /// Like [`Self::lookup_single_language`] but never fails; unknown keys echo back.
    pub fn tr(&self, key: &str) -> String {
        self.lookup_single_language(key, None)
            .unwrap_or_else(|| key.to_string())
    }

    pub fn tr_args(&self, key: &str, args: &[(&str, &str)]) -> String {
        self.lookup_single_language(key, Some(args))
            .unwrap_or_else(|| key.to_string())
    }

    /// Switches language. Exact match first, then same language subtag.
    /// Returns false (and keeps the current language) when nothing matches.
    pub fn select(&mut self, lang: &LanguageIdentifier) -> bool {
        if self.translations.contains_key(lang) {
            self.current_lang = lang.clone();
            return true;
        }

        let same_language = self
            .translations
            .keys()
            .find(|key| key.language == lang.language)
            .cloned();
        match same_language {
            Some(key) => {
                self.current_lang = key;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_has_every_key() {
        let keys: Vec<&str> = EN_US.iter().map(|(k, _)| *k).collect();
        for table in [PT_BR, ES_ES] {
            let translated = Translations::from_pairs(table);
            for key in &keys {
                assert!(translated.lookup(key).is_some(), "missing {key}");
            }
        }
    }

    #[test]
    fn matches_on_language_subtag() {
        let l10n = Localizations::with_language(&langid!("pt-PT"));
        assert_eq!(l10n.current_lang(), &langid!("pt-BR"));
        assert_eq!(l10n.tr("download-button"), "Baixar");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let mut l10n = Localizations::with_language(&langid!("ja-JP"));
        assert_eq!(l10n.current_lang(), &FALLBACK_LANG);
        assert!(!l10n.select(&langid!("de")));
        assert_eq!(l10n.tr("status-ready"), "Ready");
        assert_eq!(l10n.tr("no-such-key"), "no-such-key");
    }

    #[test]
    fn fills_placeholders() {
        let l10n = Localizations::with_language(&langid!("en-US"));
        assert_eq!(
            l10n.tr_args("status-complete", &[("title", "My clip")]),
            "Download complete: My clip"
        );
    }

    #[test]
    fn missing_key_falls_back_to_english_table() {
        let mut l10n = Localizations::with_language(&langid!("es"));
        l10n.translations
            .insert(langid!("es-ES"), Translations::default());
        assert_eq!(l10n.tr("cancel"), "Cancel");
    }
}
